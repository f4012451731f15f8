//! Availability resolution: which key actually gets fetched.
//!
//! Sparse tile services publish coverage maps; requesting a missing tile
//! wastes a round trip that ends in a 404. An [`AvailabilityCheck`] runs
//! before each fetch and may substitute an ancestor key whose (coarser)
//! content covers the requested tile. The requested key keeps its
//! identity throughout the pipeline; only the fetched payload and its
//! world placement change.
//!
//! Resolution failure is advisory: the queue falls back to fetching the
//! requested key directly, since missing availability data does not mean
//! the tile is missing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::trace;

use crate::fetch::FetchError;
use crate::key::TileKey;

/// Default ceiling on how many levels an upsample substitution may climb.
pub const DEFAULT_MAX_UPSAMPLE_LEVELS: u32 = 5;

/// Pre-fetch substitution of a requested key with the key to fetch.
pub trait AvailabilityCheck: Send + Sync {
    /// Resolve the key whose content should be fetched for `key`.
    ///
    /// `Ok(key)` means fetch as requested, `Ok(ancestor)` substitutes
    /// coarser content, and `Err` tells the caller to fall back to a
    /// direct fetch of the requested key.
    fn resolve<'a>(
        &'a self,
        key: TileKey,
    ) -> Pin<Box<dyn Future<Output = Result<TileKey, FetchError>> + Send + 'a>>;
}

/// Fetches every key as requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectAvailability;

impl AvailabilityCheck for DirectAvailability {
    fn resolve<'a>(
        &'a self,
        key: TileKey,
    ) -> Pin<Box<dyn Future<Output = Result<TileKey, FetchError>> + Send + 'a>> {
        Box::pin(async move { Ok(key) })
    }
}

/// Substitutes the nearest available ancestor for unavailable keys.
///
/// The probe answers "does the service have content at this key". When
/// it rejects the requested key, ancestors are probed one level at a
/// time up to the configured ceiling.
pub struct UpsampleAvailability<F> {
    probe: F,
    max_levels_up: u32,
}

impl<F> UpsampleAvailability<F>
where
    F: Fn(&TileKey) -> bool + Send + Sync,
{
    /// Create a check with the default climb ceiling.
    pub fn new(probe: F) -> Self {
        Self {
            probe,
            max_levels_up: DEFAULT_MAX_UPSAMPLE_LEVELS,
        }
    }

    /// Set how many levels above the requested key may be probed.
    pub fn with_max_levels_up(mut self, max_levels_up: u32) -> Self {
        self.max_levels_up = max_levels_up;
        self
    }
}

impl<F> AvailabilityCheck for UpsampleAvailability<F>
where
    F: Fn(&TileKey) -> bool + Send + Sync,
{
    fn resolve<'a>(
        &'a self,
        key: TileKey,
    ) -> Pin<Box<dyn Future<Output = Result<TileKey, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            if (self.probe)(&key) {
                return Ok(key);
            }
            for levels_up in 1..=self.max_levels_up {
                let Some(ancestor) = key.ancestor(levels_up) else {
                    break;
                };
                if (self.probe)(&ancestor) {
                    trace!(key = %key, fallback = %ancestor, "upsampling to available ancestor");
                    return Ok(ancestor);
                }
            }
            Err(FetchError::failed(format!(
                "no available tile within {} levels above {}",
                self.max_levels_up, key
            )))
        })
    }
}

/// Convenience alias for sharing a check across a layer and its queue.
pub type SharedAvailability = Arc<dyn AvailabilityCheck>;
