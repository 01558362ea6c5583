//! MGRS tile IDs as used in Sentinel-2 product names (e.g. `15TWG`).

use crate::transform::{central_meridian, utm_epsg, CoordinateTransformer};
use crate::{CoordError, Result};
use biomass_common::Bounds;
use tracing::debug;

/// Latitude band letters from 80°S, 8° each (X spans 72°N–84°N).
pub const LATITUDE_BANDS: &str = "CDEFGHJKLMNPQRSTUVWX";

/// Column letter sets, selected by `(zone - 1) % 3`.
const COLUMN_SETS: [&str; 3] = ["ABCDEFGH", "JKLMNPQR", "STUVWXYZ"];

/// Row letters, repeating every 2 000 km of northing.
const ROW_LETTERS: &str = "ABCDEFGHJKLMNPQRSTUV";

/// Sentinel-2 tiles are 109.8 km; the 100 km square is grown by this much.
const TILE_OVERLAP_M: f64 = 10_000.0;

/// Latitude band index for a latitude, clamped to C..=X.
pub fn band_index_for_lat(lat: f64) -> usize {
    (((lat + 80.0) / 8.0).floor() as i64).clamp(0, LATITUDE_BANDS.len() as i64 - 1) as usize
}

/// A parsed MGRS 100 km grid square.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MgrsTile {
    /// The ID as it appeared in storage, without any `T` prefix.
    pub id: String,
    pub zone: u8,
    pub band: char,
    pub column: char,
    pub row: char,
}

impl MgrsTile {
    /// Parse `<zone:2><band><column><row>`, optionally prefixed with `T`.
    pub fn parse(id: &str) -> Result<Self> {
        let trimmed = id.strip_prefix('T').unwrap_or(id);
        let invalid = || CoordError::InvalidTileId(id.to_string());

        let chars: Vec<char> = trimmed.chars().collect();
        if chars.len() != 5 || !chars[..2].iter().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let zone: u8 = trimmed[..2].parse().map_err(|_| invalid())?;
        if !(1..=60).contains(&zone) {
            return Err(invalid());
        }
        let band = chars[2];
        if !LATITUDE_BANDS.contains(band) {
            return Err(invalid());
        }
        let (column, row) = (chars[3], chars[4]);
        if !column.is_ascii_uppercase() || !row.is_ascii_uppercase() {
            return Err(invalid());
        }

        Ok(Self {
            id: trimmed.to_string(),
            zone,
            band,
            column,
            row,
        })
    }

    /// Northern hemisphere bands start at `N`.
    pub fn is_north(&self) -> bool {
        self.band >= 'N'
    }

    /// UTM EPSG code for the tile's zone and hemisphere.
    pub fn epsg(&self) -> u32 {
        utm_epsg(self.zone, self.is_north())
    }

    /// Position of the band in [`LATITUDE_BANDS`].
    pub fn band_index(&self) -> usize {
        LATITUDE_BANDS.find(self.band).unwrap_or(0)
    }

    /// `(min_lat, max_lat)` of the latitude band.
    pub fn band_lat_range(&self) -> (f64, f64) {
        let min = -80.0 + 8.0 * self.band_index() as f64;
        let max = if self.band == 'X' { 84.0 } else { min + 8.0 };
        (min, max)
    }

    /// `(min_lon, max_lon)` of the UTM zone.
    pub fn zone_lon_range(&self) -> (f64, f64) {
        let min = (self.zone as f64 - 1.0) * 6.0 - 180.0;
        (min, min + 6.0)
    }

    /// The zone × band cell in WGS84. Coarse fallback for tile bounds.
    pub fn zone_band_bounds(&self) -> Bounds {
        let (min_lon, max_lon) = self.zone_lon_range();
        let (min_lat, max_lat) = self.band_lat_range();
        Bounds::new(min_lon, min_lat, max_lon, max_lat)
    }

    /// South-west corner of the 100 km square in UTM meters.
    pub fn square_origin(&self, transformer: &CoordinateTransformer) -> Result<(f64, f64)> {
        let set = COLUMN_SETS[(self.zone as usize - 1) % 3];
        let col_index = set
            .find(self.column)
            .ok_or_else(|| CoordError::InvalidTileId(self.id.clone()))?;
        let easting = (col_index as f64 + 1.0) * 100_000.0;

        let row_pos = ROW_LETTERS
            .find(self.row)
            .ok_or_else(|| CoordError::InvalidTileId(self.id.clone()))?;
        let offset = if self.zone % 2 == 0 { 5 } else { 0 };
        let row_index = (row_pos + ROW_LETTERS.len() - offset) % ROW_LETTERS.len();
        let mut northing = row_index as f64 * 100_000.0;

        // Row letters repeat every 2 000 km; pick the cycle that reaches the band.
        let (band_min_lat, _) = self.band_lat_range();
        let (_, band_min_northing) =
            transformer.to_utm(central_meridian(self.zone), band_min_lat, self.epsg())?;
        while northing + 100_000.0 < band_min_northing {
            northing += 2_000_000.0;
        }
        Ok((easting, northing))
    }

    /// Tile footprint in UTM meters, including the Sentinel-2 overlap margin.
    pub fn utm_bounds(&self, transformer: &CoordinateTransformer) -> Result<Bounds> {
        let (e, n) = self.square_origin(transformer)?;
        Ok(Bounds::new(e, n, e + 100_000.0, n + 100_000.0).expand(TILE_OVERLAP_M))
    }

    /// Tile footprint in WGS84. Falls back to the zone × band cell when the
    /// grid square cannot be resolved.
    pub fn wgs84_bounds(&self, transformer: &CoordinateTransformer) -> Bounds {
        match self
            .utm_bounds(transformer)
            .and_then(|utm| transformer.bounds_from_utm(&utm, self.epsg()))
        {
            Ok(bounds) => bounds,
            Err(e) => {
                debug!("Using zone/band bounds for {}: {}", self.id, e);
                self.zone_band_bounds()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let tile = MgrsTile::parse("15TWG").unwrap();
        assert_eq!(tile.zone, 15);
        assert_eq!(tile.band, 'T');
        assert_eq!((tile.column, tile.row), ('W', 'G'));
        assert!(tile.is_north());
        assert_eq!(tile.epsg(), 32615);
        assert_eq!(tile.band_lat_range(), (40.0, 48.0));

        let prefixed = MgrsTile::parse("T56HLH").unwrap();
        assert_eq!(prefixed.id, "56HLH");
        assert!(!prefixed.is_north());
        assert_eq!(prefixed.epsg(), 32756);
    }

    #[test]
    fn test_parse_rejects() {
        for bad in ["", "15T", "1XTWG", "15IWG", "15OWG", "61TWG", "15TWGX", "15Twg"] {
            assert!(MgrsTile::parse(bad).is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_band_index_for_lat() {
        assert_eq!(LATITUDE_BANDS.as_bytes()[band_index_for_lat(42.0)], b'T');
        assert_eq!(LATITUDE_BANDS.as_bytes()[band_index_for_lat(0.0)], b'N');
        assert_eq!(LATITUDE_BANDS.as_bytes()[band_index_for_lat(-0.1)], b'M');
        assert_eq!(LATITUDE_BANDS.as_bytes()[band_index_for_lat(83.0)], b'X');
        assert_eq!(LATITUDE_BANDS.as_bytes()[band_index_for_lat(-85.0)], b'C');
    }

    #[test]
    fn test_square_bounds_cover_iowa_point() {
        let t = CoordinateTransformer::new();
        let tile = MgrsTile::parse("15TWG").unwrap();
        let (e, n) = tile.square_origin(&t).unwrap();
        assert_eq!(e, 500_000.0);
        assert_eq!(n, 4_600_000.0);

        let wgs = tile.wgs84_bounds(&t);
        assert!(wgs.contains_point(-92.5, 42.0), "{:?}", wgs);
        assert!(!wgs.contains_point(-95.0, 42.0));
    }

    #[test]
    fn test_unresolvable_square_falls_back() {
        let t = CoordinateTransformer::new();
        // 'A' is not in zone 15's column set.
        let tile = MgrsTile::parse("15TAG").unwrap();
        assert_eq!(tile.wgs84_bounds(&t), Bounds::new(-96.0, 40.0, -90.0, 48.0));
    }
}
