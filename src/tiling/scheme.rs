//! Tiling scheme: the static description of how world space decomposes
//! into tiles.
//!
//! A scheme is an origin, a fixed tile pixel size, and an ordered table of
//! levels of detail. Rows count downward from the origin and columns count
//! rightward, so a tile's world footprint is fully determined by its key
//! and the level's resolution. All accessors are pure; the scheme never
//! changes after construction.

use thiserror::Error;

use crate::key::TileKey;
use crate::viewport::{Extent, Point, SpatialReference};

/// One level of detail of a tiling scheme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lod {
    /// Level number (0 = coarsest); may be sparse across a scheme
    pub level: u32,
    /// Nominal resolution in world units per pixel
    pub resolution: f64,
    /// Nominal map scale denominator
    pub scale: f64,
}

impl Lod {
    /// Create a level-of-detail descriptor.
    pub fn new(level: u32, resolution: f64, scale: f64) -> Self {
        Self {
            level,
            resolution,
            scale,
        }
    }
}

/// A requested level is not defined by the scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("level {level} not defined by tiling scheme (range {min}..={max})")]
pub struct InvalidLevelError {
    /// The level that was requested
    pub level: u32,
    /// Coarsest level the scheme defines
    pub min: u32,
    /// Finest level the scheme defines
    pub max: u32,
}

/// Rejected tiling scheme descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TilingSchemeError {
    #[error("tiling scheme requires at least one level of detail")]
    EmptyLods,
    #[error("tile size must be non-zero")]
    ZeroTileSize,
    #[error("lod levels must be strictly increasing (offender: level {level})")]
    UnorderedLevels { level: u32 },
    #[error("lod resolutions must be strictly decreasing (offender: level {level})")]
    UnorderedResolutions { level: u32 },
    #[error("lod resolution must be positive (offender: level {level})")]
    NonPositiveResolution { level: u32 },
}

/// Origin, tile size and per-level resolution table of a tiled service.
///
/// Validated once at construction: at least one lod, strictly increasing
/// levels, strictly decreasing positive resolutions, non-zero tile size.
///
/// # Example
///
/// ```
/// use tileflow::{Lod, Point, SpatialReference, TileKey, TilingScheme};
///
/// let scheme = TilingScheme::new(
///     Point::new(0.0, 1024.0),
///     (256, 256),
///     vec![
///         Lod::new(0, 4.0, 4000.0),
///         Lod::new(1, 2.0, 2000.0),
///         Lod::new(2, 1.0, 1000.0),
///     ],
///     SpatialReference::new(3857),
/// )
/// .unwrap();
///
/// // Level 1 tiles span 2.0 * 256 = 512 world units.
/// let bounds = scheme.tile_bounds(&TileKey::new(1, 0, 1)).unwrap();
/// assert_eq!(bounds.xmin, 512.0);
/// assert_eq!(bounds.ymax, 1024.0);
/// ```
#[derive(Debug, Clone)]
pub struct TilingScheme {
    origin: Point,
    tile_width: u32,
    tile_height: u32,
    // Sorted by level; non-empty. Both guaranteed by `new`.
    lods: Vec<Lod>,
    spatial_reference: SpatialReference,
}

impl TilingScheme {
    /// Create a validated tiling scheme.
    pub fn new(
        origin: Point,
        tile_size: (u32, u32),
        lods: Vec<Lod>,
        spatial_reference: SpatialReference,
    ) -> Result<Self, TilingSchemeError> {
        let (tile_width, tile_height) = tile_size;
        if tile_width == 0 || tile_height == 0 {
            return Err(TilingSchemeError::ZeroTileSize);
        }
        if lods.is_empty() {
            return Err(TilingSchemeError::EmptyLods);
        }
        for lod in &lods {
            if !(lod.resolution > 0.0) {
                return Err(TilingSchemeError::NonPositiveResolution { level: lod.level });
            }
        }
        for pair in lods.windows(2) {
            if pair[1].level <= pair[0].level {
                return Err(TilingSchemeError::UnorderedLevels {
                    level: pair[1].level,
                });
            }
            if pair[1].resolution >= pair[0].resolution {
                return Err(TilingSchemeError::UnorderedResolutions {
                    level: pair[1].level,
                });
            }
        }
        Ok(Self {
            origin,
            tile_width,
            tile_height,
            lods,
            spatial_reference,
        })
    }

    /// Build the common halving pyramid: `levels` contiguous lods starting
    /// at level 0, each halving the previous resolution and scale.
    pub fn power_of_two(
        origin: Point,
        tile_size: (u32, u32),
        levels: u32,
        base_resolution: f64,
        base_scale: f64,
        spatial_reference: SpatialReference,
    ) -> Result<Self, TilingSchemeError> {
        let lods = (0..levels)
            .map(|level| {
                let factor = f64::powi(2.0, level as i32);
                Lod::new(level, base_resolution / factor, base_scale / factor)
            })
            .collect();
        Self::new(origin, tile_size, lods, spatial_reference)
    }

    /// World-space origin tiles are counted from.
    pub fn origin(&self) -> Point {
        self.origin
    }

    /// Tile width in pixels.
    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    /// Tile height in pixels.
    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// Coordinate system of the scheme.
    pub fn spatial_reference(&self) -> SpatialReference {
        self.spatial_reference
    }

    /// All levels of detail, coarse to fine.
    pub fn lods(&self) -> &[Lod] {
        &self.lods
    }

    /// Coarsest defined level.
    pub fn min_level(&self) -> u32 {
        self.lods[0].level
    }

    /// Finest defined level.
    pub fn max_level(&self) -> u32 {
        self.lods[self.lods.len() - 1].level
    }

    /// Look up the level-of-detail descriptor for `level`.
    pub fn lod_at(&self, level: u32) -> Result<&Lod, InvalidLevelError> {
        self.lods
            .binary_search_by(|lod| lod.level.cmp(&level))
            .map(|idx| &self.lods[idx])
            .map_err(|_| InvalidLevelError {
                level,
                min: self.min_level(),
                max: self.max_level(),
            })
    }

    /// Resolution of tiles at `key`'s level.
    pub fn tile_resolution(&self, key: &TileKey) -> Result<f64, InvalidLevelError> {
        Ok(self.lod_at(key.level())?.resolution)
    }

    /// World-units-per-tile span at `level`, x then y.
    pub fn tile_span(&self, level: u32) -> Result<(f64, f64), InvalidLevelError> {
        let resolution = self.lod_at(level)?.resolution;
        Ok((
            resolution * self.tile_width as f64,
            resolution * self.tile_height as f64,
        ))
    }

    /// World coordinates of the tile's upper-left corner.
    pub fn tile_origin(&self, key: &TileKey) -> Result<Point, InvalidLevelError> {
        let (span_x, span_y) = self.tile_span(key.level())?;
        Ok(Point::new(
            self.origin.x + key.col() as f64 * span_x,
            self.origin.y - key.row() as f64 * span_y,
        ))
    }

    /// World bounding box of the tile at `key`.
    pub fn tile_bounds(&self, key: &TileKey) -> Result<Extent, InvalidLevelError> {
        let (span_x, span_y) = self.tile_span(key.level())?;
        let top_left = self.tile_origin(key)?;
        Ok(Extent::new(
            top_left.x,
            top_left.y - span_y,
            top_left.x + span_x,
            top_left.y,
        ))
    }

    /// Pick the display level for a viewport resolution.
    ///
    /// Scans coarse to fine and returns the first level whose nominal
    /// resolution does not exceed the requested one, so a viewport sitting
    /// between two levels snaps to the finer of the pair and tile content
    /// is never upscaled. Clamps to the finest level when the viewport is
    /// finer than everything the scheme defines.
    pub fn select_level(&self, resolution: f64) -> u32 {
        for lod in &self.lods {
            if lod.resolution <= resolution {
                return lod.level;
            }
        }
        self.max_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> TilingScheme {
        TilingScheme::new(
            Point::new(0.0, 1024.0),
            (256, 256),
            vec![
                Lod::new(0, 4.0, 4000.0),
                Lod::new(1, 2.0, 2000.0),
                Lod::new(2, 1.0, 1000.0),
            ],
            SpatialReference::new(3857),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_empty_lods() {
        let err = TilingScheme::new(
            Point::default(),
            (256, 256),
            vec![],
            SpatialReference::new(3857),
        )
        .unwrap_err();
        assert_eq!(err, TilingSchemeError::EmptyLods);
    }

    #[test]
    fn test_rejects_zero_tile_size() {
        let err = TilingScheme::new(
            Point::default(),
            (0, 256),
            vec![Lod::new(0, 1.0, 1000.0)],
            SpatialReference::new(3857),
        )
        .unwrap_err();
        assert_eq!(err, TilingSchemeError::ZeroTileSize);
    }

    #[test]
    fn test_rejects_unordered_levels() {
        let err = TilingScheme::new(
            Point::default(),
            (256, 256),
            vec![Lod::new(1, 4.0, 4000.0), Lod::new(1, 2.0, 2000.0)],
            SpatialReference::new(3857),
        )
        .unwrap_err();
        assert_eq!(err, TilingSchemeError::UnorderedLevels { level: 1 });
    }

    #[test]
    fn test_rejects_unordered_resolutions() {
        let err = TilingScheme::new(
            Point::default(),
            (256, 256),
            vec![Lod::new(0, 2.0, 2000.0), Lod::new(1, 2.0, 1000.0)],
            SpatialReference::new(3857),
        )
        .unwrap_err();
        assert_eq!(err, TilingSchemeError::UnorderedResolutions { level: 1 });
    }

    #[test]
    fn test_rejects_non_positive_resolution() {
        let err = TilingScheme::new(
            Point::default(),
            (256, 256),
            vec![Lod::new(0, 0.0, 0.0)],
            SpatialReference::new(3857),
        )
        .unwrap_err();
        assert_eq!(err, TilingSchemeError::NonPositiveResolution { level: 0 });
    }

    #[test]
    fn test_lod_at() {
        let scheme = scheme();
        assert_eq!(scheme.lod_at(1).unwrap().resolution, 2.0);

        let err = scheme.lod_at(7).unwrap_err();
        assert_eq!(
            err,
            InvalidLevelError {
                level: 7,
                min: 0,
                max: 2
            }
        );
    }

    #[test]
    fn test_lod_at_sparse_levels() {
        let sparse = TilingScheme::new(
            Point::default(),
            (256, 256),
            vec![Lod::new(0, 8.0, 8000.0), Lod::new(2, 2.0, 2000.0)],
            SpatialReference::new(3857),
        )
        .unwrap();
        assert!(sparse.lod_at(0).is_ok());
        assert!(sparse.lod_at(2).is_ok());
        assert!(sparse.lod_at(1).is_err());
    }

    #[test]
    fn test_tile_geometry() {
        let scheme = scheme();
        // Level 1: span 512 world units per tile.
        let key = TileKey::new(1, 1, 2);
        let origin = scheme.tile_origin(&key).unwrap();
        assert_eq!(origin, Point::new(1024.0, 512.0));

        let bounds = scheme.tile_bounds(&key).unwrap();
        assert_eq!(bounds, Extent::new(1024.0, 0.0, 1536.0, 512.0));

        assert_eq!(scheme.tile_resolution(&key).unwrap(), 2.0);
    }

    #[test]
    fn test_tile_geometry_rejects_unknown_level() {
        let scheme = scheme();
        let key = TileKey::new(9, 0, 0);
        assert!(scheme.tile_origin(&key).is_err());
        assert!(scheme.tile_bounds(&key).is_err());
        assert!(scheme.tile_resolution(&key).is_err());
    }

    #[test]
    fn test_select_level_exact_and_between() {
        let scheme = scheme();
        assert_eq!(scheme.select_level(4.0), 0);
        assert_eq!(scheme.select_level(2.0), 1);
        // Between levels 0 and 1: snap to the finer of the pair.
        assert_eq!(scheme.select_level(3.0), 1);
        assert_eq!(scheme.select_level(1.5), 2);
    }

    #[test]
    fn test_select_level_clamps() {
        let scheme = scheme();
        // Coarser than everything: the coarsest level already qualifies.
        assert_eq!(scheme.select_level(100.0), 0);
        // Finer than everything: clamp to the finest.
        assert_eq!(scheme.select_level(0.1), 2);
    }

    #[test]
    fn test_power_of_two() {
        let scheme = TilingScheme::power_of_two(
            Point::new(0.0, 2048.0),
            (256, 256),
            4,
            8.0,
            8000.0,
            SpatialReference::new(3857),
        )
        .unwrap();
        assert_eq!(scheme.lods().len(), 4);
        assert_eq!(scheme.min_level(), 0);
        assert_eq!(scheme.max_level(), 3);
        assert_eq!(scheme.lod_at(3).unwrap().resolution, 1.0);
        assert_eq!(scheme.lod_at(3).unwrap().scale, 1000.0);
    }
}
