//! # biomass-tiles
//!
//! Raster tile acquisition for parcel analysis: Sentinel-2 reflectance bands
//! and ESA WorldCover land cover.
//!
//! ## Overview
//!
//! Tiles live in blob storage behind the [`BlobStore`] trait (HTTP, a local
//! directory, or memory for tests). A county run first builds a lightweight
//! index of the tiles its bounds may touch, then asks for pixels parcel by
//! parcel:
//!
//! - A decoded full tile already in the LRU cache is reused.
//! - Otherwise, if the parcel's pixel window is small, only the GeoTIFF header
//!   and the chunks under the window are fetched with range requests.
//! - Otherwise the full tile is downloaded, decoded and cached.
//!
//! Missing tiles are not errors: pixel requests return `None` and the caller
//! skips that source.
//!
//! ## Storage layout
//!
//! | Product | Container | Path |
//! |---|---|---|
//! | Sentinel-2 | `sentinel2-data` | `sentinel2_{period}/{tile}_{yyyymmdd}_{B02,B03,B04,B08}.tif` |
//! | WorldCover | `worldcover-data` | `worldcover_2021/ESA_WorldCover_10m_2021_v200_{cell}.tif` |
//!
//! ## Example
//!
//! ```no_run
//! use biomass_common::{Bounds, ParcelGeometry};
//! use biomass_coords::CoordinateTransformer;
//! use biomass_tiles::{Band, Period, TileConfig, TileManager};
//! use std::sync::Arc;
//!
//! let config = TileConfig::default();
//! let store = config.open_store()?;
//! let tiles = TileManager::new(store, Arc::new(CoordinateTransformer::new()), config);
//!
//! tiles.build_county_tile_index(&Bounds::new(-93.7, 41.8, -93.2, 42.2), Period::August)?;
//! let parcel = ParcelGeometry::from_bounds(&Bounds::new(-93.5, 42.0, -93.49, 42.01));
//! if let Some(pixels) = tiles.get_pixels_for_parcel(&parcel, &[Band::Red, Band::Nir]) {
//!     println!("{} pixels from {}", pixels.valid_pixel_count(), pixels.tile_id);
//! }
//! tiles.clear_cache();
//! # Ok::<(), biomass_tiles::TileError>(())
//! ```

mod blob;
mod cache;
mod clip;
mod config;
mod error;
mod index;
mod manager;
mod range_reader;
mod raster;

pub use blob::{BlobStore, HttpBlobStore, LocalBlobStore, MemoryBlobStore, MemoryStoreStats};
pub use cache::{CacheStats, TileCache, DEFAULT_TILE_CACHE_SIZE};
pub use clip::{
    class_counts, clip_band, ClassCounts, ClippedBand, ParcelPixels, WorldCoverSummary,
    WORLDCOVER_FOREST_CLASS, WORLDCOVER_NODATA, WORLDCOVER_PIXEL_AREA_M2,
};
pub use config::{BlobBackend, TileConfig};
pub use error::TileError;
pub use index::{
    available_sentinel2_tiles, parse_sentinel2_name, sentinel2_path, worldcover_cell_bounds,
    worldcover_path, Band, Layer, Period, TileIndexEntry, TileKind, DEFAULT_ACQUISITION_DATE,
};
pub use manager::{DownloadStats, TileManager};
pub use range_reader::{BlobRangeReader, BlockCache, DEFAULT_BLOCK_SIZE};
pub use raster::{GeoTransform, PixelWindow, Raster, StreamLimits, WindowRead};

/// Result type for tile operations.
pub type Result<T> = std::result::Result<T, TileError>;
