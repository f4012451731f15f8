//! The injected fetch seam.

use std::future::Future;
use std::pin::Pin;

use crate::fetch::error::FetchResult;
use crate::key::TileKey;

/// Performs the actual tile fetch on behalf of the queue.
///
/// The queue owns scheduling, deduplication and cancellation; the fetcher
/// owns the network/service call and the payload format, which passes
/// through the pipeline untouched. Timeouts, retries and caching are the
/// fetcher's business, not the queue's.
///
/// The returned future is raced against the entry's cancellation and
/// dropped when cancellation wins; a fetcher that observes cancellation
/// itself may also resolve `Err(FetchError::Canceled)`. Every dispatched
/// future must settle (or be dropped at cancellation); a future that
/// never completes holds its concurrency slot forever.
///
/// # Example
///
/// ```ignore
/// struct HttpFetcher {
///     client: Client,
///     url_template: String,
/// }
///
/// impl TileFetcher<Vec<u8>> for HttpFetcher {
///     fn fetch<'a>(
///         &'a self,
///         key: TileKey,
///     ) -> Pin<Box<dyn Future<Output = FetchResult<Vec<u8>>> + Send + 'a>> {
///         Box::pin(async move {
///             let url = self.tile_url(&key);
///             let bytes = self.client.get(&url).await
///                 .map_err(|e| FetchError::failed(e.to_string()))?;
///             Ok(bytes)
///         })
///     }
/// }
/// ```
pub trait TileFetcher<P>: Send + Sync {
    /// Fetch the payload for one tile.
    fn fetch<'a>(
        &'a self,
        key: TileKey,
    ) -> Pin<Box<dyn Future<Output = FetchResult<P>> + Send + 'a>>;
}
