//! Axis-aligned bounding boxes.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in a single CRS.
///
/// For WGS84 boxes `x` is longitude and `y` is latitude; for UTM boxes they
/// are easting and northing in meters. Mixing CRSs is the caller's problem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// West edge.
    pub min_x: f64,
    /// South edge.
    pub min_y: f64,
    /// East edge.
    pub max_x: f64,
    /// North edge.
    pub max_y: f64,
}

impl Bounds {
    /// Create a box from its edges.
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest box containing all the given points, or `None` for an empty iterator.
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let (x0, y0) = iter.next()?;
        let mut bounds = Self::new(x0, y0, x0, y0);
        for (x, y) in iter {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        Some(bounds)
    }

    /// Overlap test. Touching edges count as intersecting.
    pub fn intersects(&self, other: &Bounds) -> bool {
        !(self.max_x < other.min_x
            || other.max_x < self.min_x
            || self.max_y < other.min_y
            || other.max_y < self.min_y)
    }

    /// Check whether a point lies inside or on the edge of the box.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Smallest box covering both boxes.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Grow the box by `margin` on every side.
    pub fn expand(&self, margin: f64) -> Bounds {
        Bounds {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    /// Width along x.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height along y.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// The four corners, counter-clockwise from south-west.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }

    /// True when every edge is finite and min does not exceed max.
    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }
}

impl From<geo::Rect<f64>> for Bounds {
    fn from(rect: geo::Rect<f64>) -> Self {
        Bounds::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touching_edges_intersect() {
        let a = Bounds::new(0.0, 0.0, 1.0, 1.0);
        let b = Bounds::new(1.0, 0.0, 2.0, 1.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));

        let corner = Bounds::new(1.0, 1.0, 2.0, 2.0);
        assert!(a.intersects(&corner));
    }

    #[test]
    fn test_separated_boxes() {
        let a = Bounds::new(0.0, 0.0, 1.0, 1.0);
        assert!(!a.intersects(&Bounds::new(1.5, 0.0, 2.0, 1.0)));
        assert!(!a.intersects(&Bounds::new(0.0, -2.0, 1.0, -0.5)));
    }

    #[test]
    fn test_from_points_and_union() {
        let b = Bounds::from_points([(3.0, -1.0), (-2.0, 4.0), (0.0, 0.0)]).unwrap();
        assert_eq!(b, Bounds::new(-2.0, -1.0, 3.0, 4.0));
        assert!(Bounds::from_points(Vec::new()).is_none());

        let u = b.union(&Bounds::new(5.0, 5.0, 6.0, 6.0));
        assert_eq!(u, Bounds::new(-2.0, -1.0, 6.0, 6.0));
    }

    #[test]
    fn test_contains_point() {
        let b = Bounds::new(-93.0, 41.0, -92.0, 42.0);
        assert!(b.contains_point(-92.5, 41.5));
        assert!(b.contains_point(-93.0, 41.0));
        assert!(!b.contains_point(-91.9, 41.5));
    }
}
