//! Parcel geometry in WGS84 with planar-degree area helpers.

use crate::{wkb, Bounds, Result};
use geo::{Area, BooleanOps, BoundingRect, Centroid, MultiPolygon, Polygon};

/// Meters per degree of latitude, used for the equirectangular area scale.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Square meters to acres.
pub const ACRES_PER_M2: f64 = 0.000_247_105;

/// Square meters in one acre, as used by the area filters.
pub const M2_PER_ACRE: f64 = 4047.0;

/// Convert square meters to acres.
pub fn m2_to_acres(m2: f64) -> f64 {
    m2 * ACRES_PER_M2
}

/// Scale factor from square degrees to square meters at a given latitude.
pub fn m2_per_square_degree(lat: f64) -> f64 {
    METERS_PER_DEGREE * METERS_PER_DEGREE * lat.to_radians().cos()
}

/// A parcel or crop polygon in WGS84 lon/lat degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelGeometry {
    shape: MultiPolygon<f64>,
}

impl ParcelGeometry {
    /// Wrap a multipolygon.
    pub fn new(shape: MultiPolygon<f64>) -> Self {
        Self { shape }
    }

    /// A geometry with no polygons. Never valid.
    pub fn empty() -> Self {
        Self {
            shape: MultiPolygon::new(Vec::new()),
        }
    }

    /// Axis-aligned rectangle from a bounds box.
    pub fn from_bounds(bounds: &Bounds) -> Self {
        let rect = geo::Rect::new(
            geo::coord! { x: bounds.min_x, y: bounds.min_y },
            geo::coord! { x: bounds.max_x, y: bounds.max_y },
        );
        Self::new(MultiPolygon::new(vec![rect.to_polygon()]))
    }

    /// Decode from WKB bytes.
    pub fn from_wkb(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(wkb::read_multipolygon(bytes)?))
    }

    /// Encode as WKB bytes.
    pub fn to_wkb(&self) -> Vec<u8> {
        wkb::write_multipolygon(&self.shape)
    }

    /// The underlying polygons.
    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    /// Iterate over member polygons.
    pub fn polygons(&self) -> impl Iterator<Item = &Polygon<f64>> {
        self.shape.0.iter()
    }

    /// Bounding box, or `None` when empty.
    pub fn bounds(&self) -> Option<Bounds> {
        self.shape.bounding_rect().map(Bounds::from)
    }

    /// Area-weighted centroid `(lon, lat)`.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        self.shape.centroid().map(|p| (p.x(), p.y()))
    }

    /// Planar area in square degrees.
    pub fn area_deg2(&self) -> f64 {
        self.shape.unsigned_area()
    }

    /// Approximate area in square meters, scaling square degrees at the
    /// centroid latitude.
    pub fn area_m2(&self) -> f64 {
        match self.centroid() {
            Some((_, lat)) => self.area_deg2() * m2_per_square_degree(lat),
            None => 0.0,
        }
    }

    /// Approximate area in acres.
    pub fn area_acres(&self) -> f64 {
        m2_to_acres(self.area_m2())
    }

    /// Overlap area with another geometry in square meters, scaled at this
    /// geometry's centroid latitude.
    pub fn intersection_area_m2(&self, other: &ParcelGeometry) -> f64 {
        let Some((_, lat)) = self.centroid() else {
            return 0.0;
        };
        let overlap = self.shape.intersection(&other.shape);
        overlap.unsigned_area() * m2_per_square_degree(lat)
    }

    /// Structural validity: at least one polygon, every exterior ring closed
    /// with four or more finite coordinates, and a non-zero area.
    pub fn is_valid(&self) -> bool {
        if self.shape.0.is_empty() {
            return false;
        }
        let rings_ok = self.shape.0.iter().all(|polygon| {
            std::iter::once(polygon.exterior())
                .chain(polygon.interiors().iter())
                .all(|ring| {
                    ring.0.len() >= 4
                        && ring.is_closed()
                        && ring.0.iter().all(|c| c.x.is_finite() && c.y.is_finite())
                })
        });
        rings_ok && self.area_deg2() > 0.0
    }
}

impl From<Polygon<f64>> for ParcelGeometry {
    fn from(polygon: Polygon<f64>) -> Self {
        Self::new(MultiPolygon::new(vec![polygon]))
    }
}
