//! Cached point and box transforms between EPSG codes.

use crate::{CoordError, Result};
use biomass_common::Bounds;
use parking_lot::Mutex;
use proj4rs::proj::Proj;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// EPSG code for WGS84 geographic coordinates.
pub const WGS84_EPSG: u32 = 4326;

/// UTM zone for a longitude: `floor((lon + 180) / 6) + 1`, clamped to 1..=60.
///
/// Norway/Svalbard exceptions are not applied.
pub fn utm_zone_for_lon(lon: f64) -> u8 {
    (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u8
}

/// WGS84 UTM EPSG code: 326zz north of the equator, 327zz south.
pub fn utm_epsg(zone: u8, north: bool) -> u32 {
    if north {
        32600 + zone as u32
    } else {
        32700 + zone as u32
    }
}

/// WGS84 UTM EPSG code for the zone containing a point.
pub fn utm_epsg_for(lon: f64, lat: f64) -> u32 {
    utm_epsg(utm_zone_for_lon(lon), lat >= 0.0)
}

/// Longitude of a zone's central meridian.
pub fn central_meridian(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

fn proj_string(epsg: u32) -> Option<String> {
    match epsg {
        4326 => Some("+proj=longlat +datum=WGS84 +no_defs +type=crs".to_string()),
        32601..=32660 => Some(format!(
            "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs +type=crs",
            epsg - 32600
        )),
        32701..=32760 => Some(format!(
            "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs +type=crs",
            epsg - 32700
        )),
        _ => u16::try_from(epsg)
            .ok()
            .and_then(crs_definitions::from_code)
            .map(|def| def.proj4.to_string()),
    }
}

struct ProjPair {
    from: Proj,
    to: Proj,
    from_geographic: bool,
    to_geographic: bool,
}

/// WGS84/UTM conversion with a per-pair projection cache.
///
/// Building a projection parses its definition string; the cache keeps one
/// pair per `(from, to)` so repeated per-pixel calls only pay for the math.
pub struct CoordinateTransformer {
    cache: Mutex<HashMap<(u32, u32), Arc<ProjPair>>>,
}

impl Default for CoordinateTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CoordinateTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinateTransformer")
            .field("cached_pairs", &self.cached_pairs())
            .finish()
    }
}

impl CoordinateTransformer {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of projection pairs built so far.
    pub fn cached_pairs(&self) -> usize {
        self.cache.lock().len()
    }

    fn pair(&self, from: u32, to: u32) -> Result<Arc<ProjPair>> {
        if let Some(pair) = self.cache.lock().get(&(from, to)) {
            return Ok(Arc::clone(pair));
        }

        let from_def = proj_string(from).ok_or(CoordError::UnknownEpsg(from))?;
        let to_def = proj_string(to).ok_or(CoordError::UnknownEpsg(to))?;
        let build = |def: &str| {
            Proj::from_proj_string(def).map_err(|e| CoordError::Projection {
                from,
                to,
                reason: format!("{e:?}"),
            })
        };
        let pair = Arc::new(ProjPair {
            from: build(&from_def)?,
            to: build(&to_def)?,
            from_geographic: from_def.contains("+proj=longlat"),
            to_geographic: to_def.contains("+proj=longlat"),
        });
        debug!("Built projection pair EPSG:{} -> EPSG:{}", from, to);

        let mut cache = self.cache.lock();
        let entry = cache.entry((from, to)).or_insert(pair);
        Ok(Arc::clone(entry))
    }

    /// Transform a single point between two EPSG codes. Geographic
    /// coordinates are in degrees on both sides.
    pub fn transform_point(&self, from: u32, to: u32, x: f64, y: f64) -> Result<(f64, f64)> {
        if from == to {
            return Ok((x, y));
        }
        let pair = self.pair(from, to)?;
        let mut point = if pair.from_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        proj4rs::transform::transform(&pair.from, &pair.to, &mut point).map_err(|e| {
            CoordError::Projection {
                from,
                to,
                reason: format!("{e:?}"),
            }
        })?;
        if pair.to_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }

    /// WGS84 lon/lat to `(easting, northing)` in the given UTM EPSG.
    pub fn to_utm(&self, lon: f64, lat: f64, utm_epsg: u32) -> Result<(f64, f64)> {
        self.transform_point(WGS84_EPSG, utm_epsg, lon, lat)
    }

    /// UTM `(easting, northing)` back to WGS84 lon/lat.
    pub fn from_utm(&self, easting: f64, northing: f64, utm_epsg: u32) -> Result<(f64, f64)> {
        self.transform_point(utm_epsg, WGS84_EPSG, easting, northing)
    }

    /// Transform a box by projecting its four corners and taking their extent.
    pub fn transform_bounds(&self, bounds: &Bounds, from: u32, to: u32) -> Result<Bounds> {
        let mut corners = Vec::with_capacity(4);
        for (x, y) in bounds.corners() {
            corners.push(self.transform_point(from, to, x, y)?);
        }
        // Four corners always produce a box.
        Bounds::from_points(corners).ok_or(CoordError::Projection {
            from,
            to,
            reason: "no corners".to_string(),
        })
    }

    /// WGS84 box to a UTM box.
    pub fn bounds_to_utm(&self, bounds: &Bounds, utm_epsg: u32) -> Result<Bounds> {
        self.transform_bounds(bounds, WGS84_EPSG, utm_epsg)
    }

    /// UTM box to a WGS84 box.
    pub fn bounds_from_utm(&self, bounds: &Bounds, utm_epsg: u32) -> Result<Bounds> {
        self.transform_bounds(bounds, utm_epsg, WGS84_EPSG)
    }

    /// Axis-aligned overlap test; touching edges intersect. Both boxes must
    /// be in the same CRS.
    pub fn bounds_intersect(&self, a: &Bounds, b: &Bounds) -> bool {
        a.intersects(b)
    }
}
