//! # biomass-coords
//!
//! Coordinate reconciliation between WGS84 parcel data and UTM-tiled imagery.
//!
//! - [`CoordinateTransformer`] converts points and boxes between EPSG codes,
//!   caching one projection pair per `(from, to)`.
//! - [`MgrsTile`] parses Sentinel-2 tile IDs and resolves their 100 km grid
//!   square to a footprint.
//! - Tile selection for a county box: Sentinel-2 by zone/band with a ±1
//!   tolerance, WorldCover by 3° cells named `{N|S}{lat:02}{E|W}{lon:03}`.
//!
//! ```no_run
//! use biomass_common::Bounds;
//! use biomass_coords::CoordinateTransformer;
//!
//! let transformer = CoordinateTransformer::new();
//! let (e, n) = transformer.to_utm(-93.6, 42.0, 32615)?;
//! let cells = transformer.worldcover_tiles_for_bounds(&Bounds::new(-93.5, 41.5, -92.5, 42.5));
//! assert_eq!(cells, vec!["N39W096", "N39W093", "N42W096", "N42W093"]);
//! # let _ = (e, n);
//! # Ok::<(), biomass_coords::CoordError>(())
//! ```

mod error;
mod grid;
mod mgrs;
mod transform;

pub use error::CoordError;
pub use grid::{worldcover_tile_name, BAND_TOLERANCE, WORLDCOVER_CELL_DEG, ZONE_TOLERANCE};
pub use mgrs::{band_index_for_lat, MgrsTile, LATITUDE_BANDS};
pub use transform::{
    central_meridian, utm_epsg, utm_epsg_for, utm_zone_for_lon, CoordinateTransformer,
    WGS84_EPSG,
};

/// Result type for coordinate operations.
pub type Result<T> = std::result::Result<T, CoordError>;
