//! Coarse tile selection for a WGS84 bounding box.

use crate::mgrs::{band_index_for_lat, MgrsTile};
use crate::transform::{utm_zone_for_lon, CoordinateTransformer};
use biomass_common::Bounds;
use tracing::warn;

/// Neighbouring UTM zones accepted around the bounds' own zones.
///
/// Sentinel-2 tiles extend past their zone edge, so a parcel near a zone
/// boundary can be covered by the neighbour's tile. This constant has not
/// been validated against the full tile layout.
pub const ZONE_TOLERANCE: i32 = 1;

/// Neighbouring latitude bands accepted around the bounds' own bands.
pub const BAND_TOLERANCE: i32 = 1;

/// WorldCover cell size in degrees.
pub const WORLDCOVER_CELL_DEG: i32 = 3;

fn floor_to_cell(v: f64) -> i32 {
    (v / WORLDCOVER_CELL_DEG as f64).floor() as i32 * WORLDCOVER_CELL_DEG
}

/// Cell origins covering `[min, max]`. A max edge lying exactly on a grid
/// line belongs to the lower cell, unless the range is a single point.
fn cell_range(min: f64, max: f64) -> impl Iterator<Item = i32> {
    let first = floor_to_cell(min);
    let mut last = floor_to_cell(max);
    if max > min && last > first && (max / WORLDCOVER_CELL_DEG as f64).fract() == 0.0 {
        last -= WORLDCOVER_CELL_DEG;
    }
    (first..=last).step_by(WORLDCOVER_CELL_DEG as usize)
}

/// Name a WorldCover cell by its south-west corner, e.g. `N42W093`.
pub fn worldcover_tile_name(lat: i32, lon: i32) -> String {
    let ns = if lat >= 0 { 'N' } else { 'S' };
    let ew = if lon >= 0 { 'E' } else { 'W' };
    format!("{}{:02}{}{:03}", ns, lat.abs(), ew, lon.abs())
}

impl CoordinateTransformer {
    /// Sentinel-2 tiles whose zone and latitude band could cover `bounds`.
    ///
    /// Tiles within [`ZONE_TOLERANCE`] zones and [`BAND_TOLERANCE`] bands are
    /// kept, so the result over-includes; the pixel clip downstream removes
    /// the extras. Unparseable IDs are skipped.
    pub fn sentinel2_tiles_for_bounds<S: AsRef<str>>(
        &self,
        bounds: &Bounds,
        available_tile_ids: &[S],
    ) -> Vec<MgrsTile> {
        let zone_lo = utm_zone_for_lon(bounds.min_x) as i32 - ZONE_TOLERANCE;
        let zone_hi = utm_zone_for_lon(bounds.max_x) as i32 + ZONE_TOLERANCE;
        let band_lo = band_index_for_lat(bounds.min_y) as i32 - BAND_TOLERANCE;
        let band_hi = band_index_for_lat(bounds.max_y) as i32 + BAND_TOLERANCE;

        let mut tiles = Vec::new();
        for id in available_tile_ids {
            let tile = match MgrsTile::parse(id.as_ref()) {
                Ok(tile) => tile,
                Err(e) => {
                    warn!("Skipping tile: {}", e);
                    continue;
                }
            };
            let zone = tile.zone as i32;
            let band = tile.band_index() as i32;
            if (zone_lo..=zone_hi).contains(&zone) && (band_lo..=band_hi).contains(&band) {
                tiles.push(tile);
            }
        }
        tiles
    }

    /// Every 3° WorldCover cell overlapping `bounds`, floor-aligned.
    pub fn worldcover_tiles_for_bounds(&self, bounds: &Bounds) -> Vec<String> {
        let mut names = Vec::new();
        for lat in cell_range(bounds.min_y, bounds.max_y) {
            for lon in cell_range(bounds.min_x, bounds.max_x) {
                names.push(worldcover_tile_name(lat, lon));
            }
        }
        names
    }
}
