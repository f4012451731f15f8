//! Viewport-facing view over a tiling scheme.
//!
//! `TileInfoView` owns the one piece of mutable tiling state in the
//! pipeline: which level the current viewport maps to. Everything else
//! delegates to the immutable [`TilingScheme`]. Coverage enumeration clamps
//! to the layer's full extent so panning past the data edge never produces
//! keys outside the service.

use std::sync::Arc;

use tracing::trace;

use crate::key::TileKey;
use crate::tiling::scheme::{InvalidLevelError, Lod, TilingScheme};
use crate::viewport::{Extent, Point, Viewport};

/// Maps between world space and tile addresses for one layer.
///
/// Construct once per layer from the service's scheme and optional full
/// extent, then call [`update_for_viewport`](Self::update_for_viewport)
/// whenever the view changes. All geometry accessors answer for the scheme;
/// [`coverage`](Self::coverage) answers for the currently selected level.
#[derive(Debug, Clone)]
pub struct TileInfoView {
    scheme: Arc<TilingScheme>,
    full_extent: Option<Extent>,
    level: u32,
    resolution: f64,
}

impl TileInfoView {
    /// Create a view over `scheme`, optionally clamping coverage to
    /// `full_extent`.
    pub fn new(scheme: Arc<TilingScheme>, full_extent: Option<Extent>) -> Self {
        let level = scheme.min_level();
        let resolution = scheme.lods()[0].resolution;
        Self {
            scheme,
            full_extent,
            level,
            resolution,
        }
    }

    /// The underlying tiling scheme.
    pub fn scheme(&self) -> &TilingScheme {
        &self.scheme
    }

    /// Full extent coverage is clamped to, when configured.
    pub fn full_extent(&self) -> Option<Extent> {
        self.full_extent
    }

    /// Level selected by the last `update_for_viewport`.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Resolution of the selected level.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Re-select the display level for a changed viewport.
    ///
    /// Idempotent for identical input; no other visible side effect.
    pub fn update_for_viewport(&mut self, viewport: &Viewport) {
        let level = self.scheme.select_level(viewport.resolution);
        if level == self.level {
            return;
        }
        if let Ok(lod) = self.scheme.lod_at(level) {
            trace!(
                from = self.level,
                to = level,
                resolution = lod.resolution,
                "selected display level"
            );
            self.level = level;
            self.resolution = lod.resolution;
        }
    }

    /// Level-of-detail descriptor for `level`.
    pub fn lod_at(&self, level: u32) -> Result<&Lod, InvalidLevelError> {
        self.scheme.lod_at(level)
    }

    /// World coordinates of the tile's upper-left corner.
    pub fn tile_origin(&self, key: &TileKey) -> Result<Point, InvalidLevelError> {
        self.scheme.tile_origin(key)
    }

    /// World bounding box of the tile at `key`.
    pub fn tile_bounds(&self, key: &TileKey) -> Result<Extent, InvalidLevelError> {
        self.scheme.tile_bounds(key)
    }

    /// Resolution of tiles at `key`'s level.
    pub fn tile_resolution(&self, key: &TileKey) -> Result<f64, InvalidLevelError> {
        self.scheme.tile_resolution(key)
    }

    /// Keys of all tiles at the selected level intersecting `extent`,
    /// row-major.
    ///
    /// Clamped to the full extent when one is configured and to
    /// non-negative indices; empty when nothing intersects.
    pub fn coverage(&self, extent: &Extent) -> TileCoverage {
        let clipped = match self.full_extent {
            Some(full) => match extent.intersection(&full) {
                Some(clipped) => clipped,
                None => return TileCoverage::empty(self.level),
            },
            None => *extent,
        };
        if clipped.is_empty() {
            return TileCoverage::empty(self.level);
        }
        let Ok((span_x, span_y)) = self.scheme.tile_span(self.level) else {
            return TileCoverage::empty(self.level);
        };
        let origin = self.scheme.origin();

        let col_start = ((clipped.xmin - origin.x) / span_x).floor() as i64;
        let col_end = ((clipped.xmax - origin.x) / span_x).ceil() as i64 - 1;
        let row_start = ((origin.y - clipped.ymax) / span_y).floor() as i64;
        let row_end = ((origin.y - clipped.ymin) / span_y).ceil() as i64 - 1;

        let col_start = col_start.max(0);
        let row_start = row_start.max(0);
        if col_end < col_start || row_end < row_start {
            return TileCoverage::empty(self.level);
        }

        TileCoverage {
            level: self.level,
            row: row_start as u32,
            col: col_start as u32,
            row_start: row_start as u32,
            row_end: row_end as u32,
            col_start: col_start as u32,
            col_end: col_end as u32,
            exhausted: false,
        }
    }
}

/// Row-major iterator over the tile keys covering an extent.
#[derive(Debug, Clone)]
pub struct TileCoverage {
    level: u32,
    row: u32,
    col: u32,
    row_start: u32,
    row_end: u32,
    col_start: u32,
    col_end: u32,
    exhausted: bool,
}

impl TileCoverage {
    fn empty(level: u32) -> Self {
        Self {
            level,
            row: 0,
            col: 0,
            row_start: 0,
            row_end: 0,
            col_start: 0,
            col_end: 0,
            exhausted: true,
        }
    }
}

impl Iterator for TileCoverage {
    type Item = TileKey;

    fn next(&mut self) -> Option<TileKey> {
        if self.exhausted {
            return None;
        }
        let key = TileKey::new(self.level, self.row, self.col);
        if self.col < self.col_end {
            self.col += 1;
        } else if self.row < self.row_end {
            self.col = self.col_start;
            self.row += 1;
        } else {
            self.exhausted = true;
        }
        Some(key)
    }
}
