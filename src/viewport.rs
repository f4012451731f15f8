//! Viewport and world-space geometry types.
//!
//! The view/navigation layer reports every relevant change (pan, zoom,
//! resize) as a [`Viewport`]: a world-space extent plus the display
//! resolution and the spatial reference the coordinates are expressed in.
//! The pipeline never projects coordinates itself; everything here is plain
//! axis-aligned arithmetic in whatever world units the scheme uses.

use std::fmt;

/// A point in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Create a new point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned world-space bounding box.
///
/// # Example
///
/// ```
/// use tileflow::Extent;
///
/// let extent = Extent::new(0.0, 0.0, 512.0, 256.0);
/// assert_eq!(extent.width(), 512.0);
/// assert_eq!(extent.height(), 256.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    /// Create a new extent from min/max corners.
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Width in world units.
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    /// Height in world units.
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// True when the extent encloses no area.
    pub fn is_empty(&self) -> bool {
        self.xmax <= self.xmin || self.ymax <= self.ymin
    }

    /// The overlap of two extents, or `None` when they are disjoint.
    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let clipped = Extent::new(
            self.xmin.max(other.xmin),
            self.ymin.max(other.ymin),
            self.xmax.min(other.xmax),
            self.ymax.min(other.ymax),
        );
        if clipped.is_empty() {
            None
        } else {
            Some(clipped)
        }
    }

    /// A copy grown by `dx`/`dy` world units on each side.
    ///
    /// Used to pad the viewport extent by a prefetch margin before
    /// computing tile coverage.
    pub fn expanded(&self, dx: f64, dy: f64) -> Extent {
        Extent::new(
            self.xmin - dx,
            self.ymin - dy,
            self.xmax + dx,
            self.ymax + dy,
        )
    }
}

/// Identifies the coordinate system world coordinates are expressed in.
///
/// Opaque to the pipeline: the only operation is equality, checked once at
/// layer construction against the view's reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpatialReference {
    /// Well-known id of the coordinate system (e.g. 3857 for Web Mercator)
    pub wkid: u32,
}

impl SpatialReference {
    /// Create a spatial reference from a well-known id.
    pub fn new(wkid: u32) -> Self {
        Self { wkid }
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wkid:{}", self.wkid)
    }
}

/// One snapshot of what the view wants to display.
///
/// Supplied by the navigation layer on every pan/zoom/resize; drives level
/// selection and coverage computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Visible world-space region
    pub extent: Extent,
    /// Display resolution in world units per pixel
    pub resolution: f64,
    /// Coordinate system of `extent`
    pub spatial_reference: SpatialReference,
}

impl Viewport {
    /// Create a new viewport descriptor.
    pub fn new(extent: Extent, resolution: f64, spatial_reference: SpatialReference) -> Self {
        Self {
            extent,
            resolution,
            spatial_reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_dimensions() {
        let extent = Extent::new(-10.0, 5.0, 30.0, 25.0);
        assert_eq!(extent.width(), 40.0);
        assert_eq!(extent.height(), 20.0);
        assert!(!extent.is_empty());
    }

    #[test]
    fn test_extent_empty() {
        assert!(Extent::new(0.0, 0.0, 0.0, 10.0).is_empty());
        assert!(Extent::new(5.0, 0.0, 4.0, 10.0).is_empty());
        assert!(Extent::default().is_empty());
    }

    #[test]
    fn test_intersection_overlapping() {
        let a = Extent::new(0.0, 0.0, 10.0, 10.0);
        let b = Extent::new(5.0, 5.0, 15.0, 15.0);
        let clipped = a.intersection(&b).unwrap();
        assert_eq!(clipped, Extent::new(5.0, 5.0, 10.0, 10.0));
    }

    #[test]
    fn test_intersection_disjoint() {
        let a = Extent::new(0.0, 0.0, 10.0, 10.0);
        let b = Extent::new(20.0, 20.0, 30.0, 30.0);
        assert!(a.intersection(&b).is_none());
        // Touching edges enclose no area
        let c = Extent::new(10.0, 0.0, 20.0, 10.0);
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_expanded() {
        let extent = Extent::new(0.0, 0.0, 10.0, 10.0);
        let padded = extent.expanded(2.0, 3.0);
        assert_eq!(padded, Extent::new(-2.0, -3.0, 12.0, 13.0));
    }

    #[test]
    fn test_spatial_reference_equality() {
        assert_eq!(SpatialReference::new(3857), SpatialReference::new(3857));
        assert_ne!(SpatialReference::new(3857), SpatialReference::new(4326));
        assert_eq!(SpatialReference::new(3857).to_string(), "wkid:3857");
    }

    #[test]
    fn test_viewport_carries_fields() {
        let vp = Viewport::new(
            Extent::new(0.0, 0.0, 1024.0, 1024.0),
            2.0,
            SpatialReference::new(3857),
        );
        assert_eq!(vp.resolution, 2.0);
        assert_eq!(vp.extent.width(), 1024.0);
    }
}
