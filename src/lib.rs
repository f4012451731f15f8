//! Tileflow - tiled map layer fetch and eviction pipeline
//!
//! This library keeps a tiled layer's displayed tiles in sync with a
//! moving viewport: selecting a display level, diffing tile coverage,
//! pooling tile objects, and scheduling cancelable fetches behind a
//! concurrency ceiling.
//!
//! ```text
//!   Viewport ──► TileInfoView ──► TileStrategy ──► TilePool
//!   updates       (level +          (diff wanted     (recycled
//!                  coverage)         vs held)         tile objects)
//!                                       │
//!                                       ▼
//!                                  FetchQueue ──► TileFetcher
//!                                   (dedup,        (your backend)
//!                                    ceiling,
//!                                    cancel)
//! ```
//!
//! # High-Level API
//!
//! Most embeddings only need [`layer::TiledLayerView`]:
//!
//! ```ignore
//! use tileflow::layer::{TiledLayerParams, TiledLayerView};
//!
//! let mut layer = TiledLayerView::new(params, Box::new(container))?;
//! layer.update(&viewport);          // acquire/release per coverage diff
//! layer.wait_until_idle().await;    // apply fetch completions
//! ```
//!
//! The pieces compose individually too: a [`fetch::FetchQueue`] works as
//! a generic keyed download scheduler, and [`tiling::TilingScheme`] as a
//! standalone tile-math library.

pub mod availability;
pub mod fetch;
pub mod key;
pub mod layer;
pub mod logging;
pub mod pool;
pub mod strategy;
pub mod tiling;
pub mod viewport;

pub use key::TileKey;
pub use tiling::{Lod, TileInfoView, TilingScheme};
pub use viewport::{Extent, Point, SpatialReference, Viewport};

/// Version of the tileflow library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
