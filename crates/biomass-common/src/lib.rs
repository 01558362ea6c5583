//! # biomass-common
//!
//! Types shared by every stage of the parcel biomass pipeline.
//!
//! - [`Bounds`]: axis-aligned boxes in any single CRS
//! - [`ParcelGeometry`]: WGS84 polygons with WKB codec and planar-degree
//!   area helpers (`area_m2 = deg² × 111320² × cos(lat)`)
//! - Input records from the parcel, crop and forest inventory stores
//! - [`BiomassRecord`], [`SkipReason`] and [`Checkpoint`] produced by a run

mod bounds;
mod error;
mod geometry;
mod output;
mod records;
pub mod wkb;

pub use bounds::Bounds;
pub use error::GeometryError;
pub use geometry::{
    m2_per_square_degree, m2_to_acres, ParcelGeometry, ACRES_PER_M2, METERS_PER_DEGREE,
    M2_PER_ACRE,
};
pub use output::{
    BiomassRecord, Checkpoint, CheckpointStatus, DataSource, IndexValues, SkipReason,
};
pub use records::{CropIntersection, ForestPlot, Parcel, PlotBiomass, StandAttributes, TreeRecord};

/// Result type for geometry operations.
pub type Result<T> = std::result::Result<T, GeometryError>;
