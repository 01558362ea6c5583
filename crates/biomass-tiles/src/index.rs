//! Tile index entries and storage naming.
//!
//! Sentinel-2 bands are stored as
//! `sentinel2_<period>/<tile>_<yyyymmdd>_<band>.tif` in the Sentinel-2
//! container; WorldCover cells as
//! `worldcover_2021/ESA_WorldCover_10m_2021_v200_<cell>.tif`.

use biomass_common::Bounds;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Acquisition date used when a tile's file name carries none.
pub const DEFAULT_ACQUISITION_DATE: &str = "20240829";

/// WorldCover folder and file prefix.
const WORLDCOVER_PREFIX: &str = "worldcover_2021/ESA_WorldCover_10m_2021_v200_";

/// Sentinel-2 reflectance bands used by the vegetation indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Blue,
    Green,
    Red,
    Nir,
}

impl Band {
    pub const ALL: [Band; 4] = [Band::Blue, Band::Green, Band::Red, Band::Nir];

    /// Sentinel-2 band code.
    pub const fn code(&self) -> &'static str {
        match self {
            Band::Blue => "B02",
            Band::Green => "B03",
            Band::Red => "B04",
            Band::Nir => "B08",
        }
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Seasonal Sentinel-2 composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    June,
    #[default]
    August,
    October,
}

impl Period {
    /// Storage folder for the period.
    pub const fn folder(&self) -> &'static str {
        match self {
            Period::June => "sentinel2_june",
            Period::August => "sentinel2_august",
            Period::October => "sentinel2_october",
        }
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "june" => Ok(Period::June),
            "august" => Ok(Period::August),
            "october" => Ok(Period::October),
            other => Err(format!("unknown period '{}'", other)),
        }
    }
}

/// A raster layer within a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    Band(Band),
    LandCover,
}

/// Which product a tile belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Sentinel2,
    WorldCover,
}

/// Metadata for one tile; no pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct TileIndexEntry {
    pub tile_id: String,
    pub kind: TileKind,
    pub container: String,
    /// Storage path per layer.
    pub paths: BTreeMap<Layer, String>,
    pub wgs84_bounds: Bounds,
    /// CRS of the tile's pixels.
    pub epsg: u32,
    pub acquisition_date: Option<String>,
}

impl TileIndexEntry {
    /// Cache key for a layer: `container/path`.
    pub fn cache_key(&self, layer: Layer) -> Option<String> {
        self.paths
            .get(&layer)
            .map(|path| format!("{}/{}", self.container, path))
    }
}

/// Storage path of one Sentinel-2 band.
pub fn sentinel2_path(period: Period, tile_id: &str, date: &str, band: Band) -> String {
    format!("{}/{}_{}_{}.tif", period.folder(), tile_id, date, band.code())
}

/// Storage path of a WorldCover cell.
pub fn worldcover_path(cell: &str) -> String {
    format!("{}{}.tif", WORLDCOVER_PREFIX, cell)
}

/// WGS84 extent of a WorldCover cell named by its south-west corner,
/// e.g. `N42W093`.
pub fn worldcover_cell_bounds(cell: &str) -> Option<Bounds> {
    if cell.len() != 7 || !cell.is_ascii() {
        return None;
    }
    let lat: f64 = cell[1..3].parse().ok()?;
    let lon: f64 = cell[4..7].parse().ok()?;
    let lat = match &cell[0..1] {
        "N" => lat,
        "S" => -lat,
        _ => return None,
    };
    let lon = match &cell[3..4] {
        "E" => lon,
        "W" => -lon,
        _ => return None,
    };
    let size = biomass_coords::WORLDCOVER_CELL_DEG as f64;
    Some(Bounds::new(lon, lat, lon + size, lat + size))
}

/// Parse `<tile>_<yyyymmdd>_<band>.tif` (any folder prefix) into the tile
/// ID and, if present, its date.
pub fn parse_sentinel2_name(name: &str) -> Option<(String, Option<String>)> {
    let file = name.rsplit('/').next()?;
    let mut parts = file.split('_');
    let tile = parts.next().filter(|t| !t.is_empty() && !t.ends_with(".tif"))?;
    let date = parts
        .next()
        .filter(|d| d.len() == 8 && d.bytes().all(|b| b.is_ascii_digit()))
        .map(String::from);
    Some((tile.to_string(), date))
}

/// Group listed blob names into tile ID → first date seen (names sorted).
pub fn available_sentinel2_tiles(names: &[String]) -> BTreeMap<String, String> {
    let mut tiles: BTreeMap<String, Option<String>> = BTreeMap::new();
    for name in names {
        if let Some((tile, date)) = parse_sentinel2_name(name) {
            let slot = tiles.entry(tile).or_insert(None);
            if slot.is_none() {
                *slot = date;
            }
        }
    }
    tiles
        .into_iter()
        .map(|(tile, date)| {
            (
                tile,
                date.unwrap_or_else(|| DEFAULT_ACQUISITION_DATE.to_string()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(
            sentinel2_path(Period::August, "15TWG", "20240829", Band::Nir),
            "sentinel2_august/15TWG_20240829_B08.tif"
        );
        assert_eq!(
            worldcover_path("N42W093"),
            "worldcover_2021/ESA_WorldCover_10m_2021_v200_N42W093.tif"
        );
    }

    #[test]
    fn test_worldcover_cell_bounds() {
        assert_eq!(
            worldcover_cell_bounds("N42W093"),
            Some(Bounds::new(-93.0, 42.0, -90.0, 45.0))
        );
        assert_eq!(
            worldcover_cell_bounds("S03E006"),
            Some(Bounds::new(6.0, -3.0, 9.0, 0.0))
        );
        assert_eq!(worldcover_cell_bounds("X42W093"), None);
        assert_eq!(worldcover_cell_bounds("N42W93"), None);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            parse_sentinel2_name("sentinel2_june/15TWG_20240615_B04.tif"),
            Some(("15TWG".to_string(), Some("20240615".to_string())))
        );
        assert_eq!(
            parse_sentinel2_name("sentinel2_june/15TWG_B04.tif"),
            Some(("15TWG".to_string(), None))
        );
        assert_eq!(parse_sentinel2_name("sentinel2_june/"), None);
    }

    #[test]
    fn test_available_tiles_dates() {
        let names: Vec<String> = [
            "sentinel2_august/15TWG_20240812_B02.tif",
            "sentinel2_august/15TWG_20240812_B03.tif",
            "sentinel2_august/15TWH_B02.tif",
            "sentinel2_august/15TXG_20240829_B04.tif",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let tiles = available_sentinel2_tiles(&names);
        assert_eq!(tiles.len(), 3);
        assert_eq!(tiles["15TWG"], "20240812");
        assert_eq!(tiles["15TWH"], DEFAULT_ACQUISITION_DATE);
        assert_eq!(tiles["15TXG"], "20240829");
    }

    #[test]
    fn test_period_parse() {
        assert_eq!("June".parse::<Period>(), Ok(Period::June));
        assert!("winter".parse::<Period>().is_err());
        assert_eq!(Period::default().folder(), "sentinel2_august");
    }
}
