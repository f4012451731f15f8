//! Reusable tile wrappers.
//!
//! Continuous panning churns through tile objects at a high rate; the pool
//! recycles them so steady-state scrolling allocates nothing. The pool is
//! an explicit instance owned by its layer (never process-global) and grows
//! to the high-water mark of concurrently held tiles without shrinking.
//!
//! Misuse (double release, releasing a tile from another pool) is a
//! programmer error and panics rather than corrupting the free list.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::key::TileKey;
use crate::viewport::Point;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Fetched payload plus the world placement of the key it was fetched for.
///
/// `key` is the key actually fetched; after an upsample substitution it is
/// an ancestor of the requested key, and `origin`/`resolution` describe the
/// ancestor's (larger) footprint so the renderer can place it correctly.
#[derive(Debug, Clone)]
pub struct TileSource<T> {
    /// Key the payload was fetched for
    pub key: TileKey,
    /// World coordinates of the fetched tile's upper-left corner
    pub origin: Point,
    /// Resolution of the fetched tile in world units per pixel
    pub resolution: f64,
    /// Opaque payload (image bytes, feature set, ...)
    pub data: T,
}

/// A pooled tile wrapper.
///
/// Acquired in a neutral state (zero key, no source), addressed via
/// [`key_mut`](Self::key_mut), populated asynchronously once its fetch
/// settles. Identity is stable across acquire/release cycles; the pool
/// guarantees at most one live instance per acquisition. Deliberately not
/// `Clone`.
#[derive(Debug)]
pub struct Tile<T> {
    key: TileKey,
    resolution: f64,
    width: u32,
    height: u32,
    source: Option<TileSource<T>>,
    slot: u32,
    pool: u64,
}

impl<T> Tile<T> {
    /// The tile's address.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Mutable access to the key, for re-addressing a recycled tile.
    pub fn key_mut(&mut self) -> &mut TileKey {
        &mut self.key
    }

    /// Resolution in world units per pixel at the tile's level.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Set the resolution for the current key.
    pub fn set_resolution(&mut self, resolution: f64) {
        self.resolution = resolution;
    }

    /// Pixel width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Pixel height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Set the pixel dimensions from the tiling scheme.
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// The fetched payload, once available.
    pub fn source(&self) -> Option<&TileSource<T>> {
        self.source.as_ref()
    }

    /// Attach the fetched payload.
    pub fn set_source(&mut self, source: TileSource<T>) {
        self.source = Some(source);
    }

    /// True once the payload has arrived.
    pub fn is_ready(&self) -> bool {
        self.source.is_some()
    }

    fn reset(&mut self) {
        self.key.set(0, 0, 0);
        self.resolution = 0.0;
        self.width = 0;
        self.height = 0;
        self.source = None;
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Instances constructed over the pool's lifetime
    pub created: u64,
    /// Total acquisitions
    pub acquired: u64,
    /// Total releases
    pub released: u64,
    /// Currently live (acquired, not yet released)
    pub live: usize,
    /// High-water mark of concurrently live instances
    pub peak_live: usize,
}

/// Recycling pool for [`Tile`] instances.
pub struct TilePool<T> {
    id: u64,
    free: Vec<Tile<T>>,
    live: HashSet<u32>,
    next_slot: u32,
    created: u64,
    acquired: u64,
    released: u64,
    peak_live: usize,
}

impl<T> TilePool<T> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            free: Vec::new(),
            live: HashSet::new(),
            next_slot: 0,
            created: 0,
            acquired: 0,
            released: 0,
            peak_live: 0,
        }
    }

    /// Take a tile in its neutral state, constructing one only when no
    /// recycled instance is available.
    pub fn acquire(&mut self) -> Tile<T> {
        let tile = match self.free.pop() {
            Some(tile) => tile,
            None => {
                let slot = self.next_slot;
                self.next_slot += 1;
                self.created += 1;
                trace!(instances = self.created, "tile pool grew");
                Tile {
                    key: TileKey::default(),
                    resolution: 0.0,
                    width: 0,
                    height: 0,
                    source: None,
                    slot,
                    pool: self.id,
                }
            }
        };
        self.live.insert(tile.slot);
        self.acquired += 1;
        if self.live.len() > self.peak_live {
            self.peak_live = self.live.len();
        }
        tile
    }

    /// Return a tile to the free list, clearing its key, payload and
    /// dimensions.
    ///
    /// # Panics
    ///
    /// Panics when the tile was not acquired from this pool or has already
    /// been released.
    pub fn release(&mut self, mut tile: Tile<T>) {
        if tile.pool != self.id {
            panic!(
                "tile {} released into a pool it was not acquired from",
                tile.key
            );
        }
        if !self.live.remove(&tile.slot) {
            panic!("tile {} released twice", tile.key);
        }
        tile.reset();
        self.free.push(tile);
        self.released += 1;
    }

    /// Number of currently live instances.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of recycled instances waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created,
            acquired: self.acquired,
            released: self.released,
            live: self.live.len(),
            peak_live: self.peak_live,
        }
    }
}

impl<T> Default for TilePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_neutral() {
        let mut pool: TilePool<Vec<u8>> = TilePool::new();
        let tile = pool.acquire();
        assert_eq!(tile.key(), TileKey::default());
        assert!(tile.source().is_none());
        assert!(!tile.is_ready());
        assert_eq!(tile.resolution(), 0.0);
    }

    #[test]
    fn test_release_recycles_instance() {
        let mut pool: TilePool<Vec<u8>> = TilePool::new();
        let mut tile = pool.acquire();
        tile.key_mut().set(3, 4, 5);
        tile.set_resolution(2.0);
        tile.set_size(256, 256);
        tile.set_source(TileSource {
            key: tile.key(),
            origin: Point::new(0.0, 0.0),
            resolution: 2.0,
            data: vec![1, 2, 3],
        });
        let slot = tile.slot;
        pool.release(tile);

        // Same instance comes back, fully reset.
        let tile = pool.acquire();
        assert_eq!(tile.slot, slot);
        assert_eq!(tile.key(), TileKey::default());
        assert!(tile.source().is_none());
        assert_eq!(tile.width(), 0);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn test_no_double_acquire_of_live_instance() {
        let mut pool: TilePool<()> = TilePool::new();
        let a = pool.acquire();
        let b = pool.acquire();
        assert_ne!(a.slot, b.slot);
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn test_growth_bounded_by_peak() {
        let mut pool: TilePool<()> = TilePool::new();
        let tiles: Vec<Tile<()>> = (0..4).map(|_| pool.acquire()).collect();
        for tile in tiles {
            pool.release(tile);
        }
        // Interleaved cycles after the peak never construct new instances.
        for _ in 0..10 {
            let a = pool.acquire();
            let b = pool.acquire();
            pool.release(a);
            pool.release(b);
        }
        let stats = pool.stats();
        assert_eq!(stats.created, 4);
        assert_eq!(stats.peak_live, 4);
        assert_eq!(stats.live, 0);
        assert_eq!(stats.acquired, 24);
        assert_eq!(stats.released, 24);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_release_panics() {
        let mut pool: TilePool<()> = TilePool::new();
        let tile = pool.acquire();
        let duplicate = Tile {
            key: tile.key(),
            resolution: 0.0,
            width: 0,
            height: 0,
            source: None,
            slot: tile.slot,
            pool: tile.pool,
        };
        pool.release(tile);
        pool.release(duplicate);
    }

    #[test]
    #[should_panic(expected = "not acquired from")]
    fn test_foreign_release_panics() {
        let mut pool_a: TilePool<()> = TilePool::new();
        let mut pool_b: TilePool<()> = TilePool::new();
        let tile = pool_a.acquire();
        pool_b.release(tile);
    }
}
