//! Tile addressing.
//!
//! Provides the `TileKey` type identifying one tile of a tiling scheme by
//! `(level, row, col)`. Keys are small `Copy` values used directly as map
//! keys throughout the pipeline; the canonical `"level/row/col"` form is
//! what shows up in logs.

use std::fmt;

/// Identifies a tile within a tiling scheme.
///
/// Two keys are equal iff level, row and column all match. The `Display`
/// form is the canonical `"level/row/col"` string.
///
/// # Example
///
/// ```
/// use tileflow::TileKey;
///
/// let key = TileKey::new(2, 3, 4);
/// assert_eq!(key.to_string(), "2/3/4");
/// assert_eq!(key, TileKey::new(2, 3, 4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileKey {
    /// Level of detail (0 = coarsest)
    level: u32,
    /// Tile row, counted downward from the scheme origin
    row: u32,
    /// Tile column, counted rightward from the scheme origin
    col: u32,
}

impl TileKey {
    /// Create a new tile key.
    pub fn new(level: u32, row: u32, col: u32) -> Self {
        Self { level, row, col }
    }

    /// Get the level of detail.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Get the tile row.
    pub fn row(&self) -> u32 {
        self.row
    }

    /// Get the tile column.
    pub fn col(&self) -> u32 {
        self.col
    }

    /// Overwrite all three fields in place.
    ///
    /// Exists for pooled tile reuse: a recycled tile keeps its identity
    /// (and pool slot) while being re-addressed for a new acquisition.
    pub fn set(&mut self, level: u32, row: u32, col: u32) {
        self.level = level;
        self.row = row;
        self.col = col;
    }

    /// Overwrite this key with the fields of another.
    pub fn set_from(&mut self, other: &TileKey) {
        self.set(other.level, other.row, other.col);
    }

    /// The covering key `levels_up` levels coarser, assuming a halving
    /// pyramid (each level doubles row/col counts).
    ///
    /// Returns `None` when `levels_up` exceeds the key's level.
    ///
    /// # Example
    ///
    /// ```
    /// use tileflow::TileKey;
    ///
    /// let key = TileKey::new(4, 12, 13);
    /// assert_eq!(key.ancestor(2), Some(TileKey::new(2, 3, 3)));
    /// assert_eq!(key.ancestor(5), None);
    /// ```
    pub fn ancestor(&self, levels_up: u32) -> Option<TileKey> {
        if levels_up > self.level {
            return None;
        }
        Some(TileKey::new(
            self.level - levels_up,
            self.row >> levels_up,
            self.col >> levels_up,
        ))
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.row, self.col)
    }
}
