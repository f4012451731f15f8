//! Tiling scheme math: level selection, tile geometry, viewport coverage.
//!
//! [`TilingScheme`] is the immutable description of how world space
//! decomposes into tiles; [`TileInfoView`] layers the per-viewport level
//! selection and full-extent clamping on top of it.

mod scheme;
mod view;

pub use scheme::{InvalidLevelError, Lod, TilingScheme, TilingSchemeError};
pub use view::{TileCoverage, TileInfoView};
