//! # biomass-store
//!
//! Pooled, retrying access to the four relational stores the pipeline
//! reads and writes:
//!
//! | Store | Tables | Pool (min/max) | Attempts |
//! |---|---|---|---|
//! | parcels | `parcels` | 1 / 5 | 3 |
//! | crops | `cdl_polygons` | 1 / 5 | 3 |
//! | forestry | `fia_plots`, `fia_trees` | 2 / 20 | 5 |
//! | output | `parcel_biomass_analysis`, `processing_checkpoints` | 1 / 8 | 3 |
//!
//! Each store is a SQLite file. Geometries are WGS84 polygon WKB blobs;
//! every connection registers `geom_area_m2` and
//! `geom_intersection_area_m2` so area filters and crop overlays run in SQL.
//!
//! ## Example
//!
//! ```no_run
//! use biomass_store::{SpatialStore, StoreConfig};
//! use std::path::Path;
//!
//! let store = SpatialStore::open(&StoreConfig::in_directory(Path::new("data")))?;
//! store.initialize_schemas()?;
//! let page = store.get_county_parcels("19", "055", 0, Some(1000), 0.1)?;
//! for parcel in &page {
//!     let crops = store.get_crop_intersections(&parcel.geometry)?;
//!     println!("{}: {} crop codes", parcel.parcel_id, crops.len());
//! }
//! # Ok::<(), biomass_store::StoreError>(())
//! ```

mod config;
mod error;
pub mod functions;
mod pool;
mod retry;
pub mod schema;
mod store;

pub use config::{PoolSettings, StoreConfig, StoreKind, StoreSettings};
pub use error::StoreError;
pub use pool::{ConnectionPool, PooledConnection};
pub use retry::RetryPolicy;
pub use store::{
    timestamp_key, DatabaseStats, SpatialStore, LIVE_TREE_STATUS, MAX_NEARBY_PLOTS,
    NON_AGRICULTURAL_CODES,
};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
