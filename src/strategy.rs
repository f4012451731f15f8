//! Viewport reconciliation: decides which tiles a layer holds.
//!
//! Each [`update`](TileStrategy::update) pass diffs the currently held
//! tile set against the tiles covering the viewport at the selected
//! level, acquiring exactly the missing keys and dropping exactly the
//! no-longer-wanted ones. Dispatch is gated for the duration of the
//! pass so a burst of acquisitions dispatches in one batch after the
//! diff, not interleaved with it.
//!
//! Dropped tiles follow the configured [`CachePolicy`]: `Purge` hands
//! them straight back to the host, `Keep` parks them in a bounded
//! retained set so a viewport that pans back revives them without a
//! refetch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::fetch::DispatchGate;
use crate::key::TileKey;
use crate::pool::Tile;
use crate::tiling::TileInfoView;
use crate::viewport::{Extent, Viewport};

/// Default cap on the retained set under [`CachePolicy::Keep`].
pub const DEFAULT_MAX_RETAINED_TILES: usize = 64;

/// Default number of extra tile rings covered around the viewport.
pub const DEFAULT_COVERAGE_MARGIN: u32 = 0;

/// What happens to a held tile when the viewport no longer wants it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Park up to `max_retained` dropped tiles for cheap revival, oldest
    /// released first once the cap is exceeded.
    Keep {
        /// Retained set cap; zero releases on the next pass.
        max_retained: usize,
    },
    /// Release dropped tiles back to the host immediately.
    Purge,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::Keep {
            max_retained: DEFAULT_MAX_RETAINED_TILES,
        }
    }
}

/// Configuration for [`TileStrategy`].
#[derive(Debug, Clone, Default)]
pub struct TileStrategyConfig {
    /// Policy for tiles leaving the wanted set.
    pub cache_policy: CachePolicy,
    /// Extra rings of tiles covered around the viewport extent.
    pub coverage_margin: u32,
}

impl TileStrategyConfig {
    /// Set the cache policy.
    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Set the coverage margin in tile rings.
    pub fn with_coverage_margin(mut self, coverage_margin: u32) -> Self {
        self.coverage_margin = coverage_margin;
        self
    }
}

/// Failure to produce a tile for a wanted key.
///
/// One failed key never aborts a reconciliation pass; the strategy logs
/// it and continues with the rest of the wanted set.
#[derive(Debug, Clone, Error)]
#[error("tile {key} unavailable from host: {reason}")]
pub struct HostError {
    /// Key the host could not produce a tile for.
    pub key: TileKey,
    /// Human-readable cause.
    pub reason: String,
}

impl HostError {
    /// Create an error for `key`.
    pub fn new(key: TileKey, reason: impl Into<String>) -> Self {
        Self {
            key,
            reason: reason.into(),
        }
    }
}

/// Where tiles come from and go back to.
///
/// The layer implements this over its pool, container, and fetch
/// bookkeeping; tests implement it over a bare pool.
pub trait TileHost<T> {
    /// Produce a tile for `key`, typically starting its fetch.
    fn acquire_tile(&mut self, key: TileKey) -> Result<Tile<T>, HostError>;

    /// Take back a tile the strategy no longer tracks, canceling any
    /// outstanding fetch for it.
    fn release_tile(&mut self, tile: Tile<T>);
}

/// Cumulative reconciliation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrategyStats {
    /// Reconciliation passes run.
    pub passes: u64,
    /// Tiles acquired from the host.
    pub acquired: u64,
    /// Tiles revived from the retained set.
    pub revived: u64,
    /// Tiles released back to the host.
    pub released: u64,
}

/// Diffs held tiles against viewport coverage on every update.
///
/// Owns all tiles it has acquired until they are released to the host
/// or the strategy is destroyed. Held and retained sets are disjoint.
pub struct TileStrategy<T> {
    config: TileStrategyConfig,
    gate: Arc<dyn DispatchGate>,
    held: HashMap<TileKey, Tile<T>>,
    retained: HashMap<TileKey, Tile<T>>,
    // Retention order, oldest first. Stale keys (revived since) are
    // skipped when trimming.
    retained_order: VecDeque<TileKey>,
    stats: StrategyStats,
}

impl<T> TileStrategy<T> {
    /// Create a strategy gating dispatch through `gate`.
    pub fn new(gate: Arc<dyn DispatchGate>, config: TileStrategyConfig) -> Self {
        Self {
            config,
            gate,
            held: HashMap::new(),
            retained: HashMap::new(),
            retained_order: VecDeque::new(),
            stats: StrategyStats::default(),
        }
    }

    /// Reconcile held tiles against the tiles covering `viewport` at the
    /// view's selected level.
    ///
    /// Acquires only keys in the new coverage that are neither held nor
    /// retained, and drops only held keys that left the coverage. Host
    /// acquisition failures are logged and skipped.
    pub fn update<H: TileHost<T>>(
        &mut self,
        viewport: &Viewport,
        info_view: &TileInfoView,
        host: &mut H,
    ) {
        self.gate.pause();
        self.stats.passes += 1;

        let extent = self.padded_extent(viewport, info_view);
        let wanted: HashSet<TileKey> = info_view.coverage(&extent).collect();

        let mut acquired = 0u64;
        let mut revived = 0u64;
        let mut released = 0u64;

        for key in &wanted {
            if self.held.contains_key(key) {
                continue;
            }
            if let Some(tile) = self.retained.remove(key) {
                self.held.insert(*key, tile);
                revived += 1;
                trace!(key = %key, "revived retained tile");
                continue;
            }
            match host.acquire_tile(*key) {
                Ok(tile) => {
                    self.held.insert(*key, tile);
                    acquired += 1;
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "tile acquisition failed");
                }
            }
        }

        let dropped: Vec<TileKey> = self
            .held
            .keys()
            .filter(|key| !wanted.contains(*key))
            .copied()
            .collect();
        for key in dropped {
            let Some(tile) = self.held.remove(&key) else {
                continue;
            };
            match self.config.cache_policy {
                CachePolicy::Keep { .. } => {
                    self.retain_tile(key, tile);
                    trace!(key = %key, "tile parked in retained set");
                }
                CachePolicy::Purge => {
                    host.release_tile(tile);
                    released += 1;
                }
            }
        }
        released += self.trim_retained(host);

        self.stats.acquired += acquired;
        self.stats.revived += revived;
        self.stats.released += released;

        self.gate.resume();

        debug!(
            level = info_view.level(),
            wanted = wanted.len(),
            held = self.held.len(),
            retained = self.retained.len(),
            acquired,
            revived,
            released,
            "reconciliation pass complete"
        );
    }

    /// Release every held and retained tile back to the host.
    ///
    /// Safe to call more than once; later calls find nothing to release.
    pub fn destroy<H: TileHost<T>>(&mut self, host: &mut H) {
        let mut released = 0u64;
        for (_, tile) in self.held.drain() {
            host.release_tile(tile);
            released += 1;
        }
        for (_, tile) in self.retained.drain() {
            host.release_tile(tile);
            released += 1;
        }
        self.retained_order.clear();
        if released > 0 {
            self.stats.released += released;
            debug!(released, "tile strategy destroyed");
        }
    }

    /// Shared access to a tracked tile, held or retained.
    pub fn tile(&self, key: &TileKey) -> Option<&Tile<T>> {
        match self.held.get(key) {
            Some(tile) => Some(tile),
            None => self.retained.get(key),
        }
    }

    /// Mutable access to a tracked tile, held or retained.
    pub fn tile_mut(&mut self, key: &TileKey) -> Option<&mut Tile<T>> {
        match self.held.get_mut(key) {
            Some(tile) => Some(tile),
            None => self.retained.get_mut(key),
        }
    }

    /// True while `key` is tracked, held or retained.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.held.contains_key(key) || self.retained.contains_key(key)
    }

    /// True while `key` is in the wanted set of the latest pass.
    pub fn is_held(&self, key: &TileKey) -> bool {
        self.held.contains_key(key)
    }

    /// All tracked tiles, held first.
    pub fn tiles(&self) -> impl Iterator<Item = &Tile<T>> {
        self.held.values().chain(self.retained.values())
    }

    /// Keys of all tracked tiles, held first.
    pub fn tile_keys(&self) -> Vec<TileKey> {
        self.held
            .keys()
            .chain(self.retained.keys())
            .copied()
            .collect()
    }

    /// Number of held tiles.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Number of retained tiles.
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StrategyStats {
        self.stats
    }

    fn padded_extent(&self, viewport: &Viewport, info_view: &TileInfoView) -> Extent {
        if self.config.coverage_margin == 0 {
            return viewport.extent;
        }
        let Ok((span_x, span_y)) = info_view.scheme().tile_span(info_view.level()) else {
            return viewport.extent;
        };
        let margin = f64::from(self.config.coverage_margin);
        viewport.extent.expanded(margin * span_x, margin * span_y)
    }

    fn retain_tile(&mut self, key: TileKey, tile: Tile<T>) {
        // A key dropped, revived, and dropped again must not keep its
        // old place in line.
        self.retained_order.retain(|k| *k != key);
        self.retained_order.push_back(key);
        self.retained.insert(key, tile);
    }

    fn trim_retained<H: TileHost<T>>(&mut self, host: &mut H) -> u64 {
        let CachePolicy::Keep { max_retained } = self.config.cache_policy else {
            return 0;
        };
        let mut released = 0u64;
        while self.retained.len() > max_retained {
            let Some(oldest) = self.retained_order.pop_front() else {
                break;
            };
            if let Some(tile) = self.retained.remove(&oldest) {
                host.release_tile(tile);
                released += 1;
                trace!(key = %oldest, "retained tile evicted");
            }
        }
        released
    }
}
