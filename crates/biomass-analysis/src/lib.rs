//! # biomass-analysis
//!
//! Converts one parcel's raw inputs into biomass figures.
//!
//! - [`LandCoverAnalyzer`]: WorldCover class histogram → area breakdown,
//!   the allocation basis for everything else
//! - [`VegetationAnalyzer`]: Sentinel-2 bands → NDVI, EVI, SAVI, NDWI
//! - [`CropAnalyzer`]: CDL intersections → yield and residue tons
//! - [`ForestAnalyzer`]: FIA plots and trees → standing, harvestable and
//!   residue tons through an ordered chain of estimation tiers
//!
//! Yield and biomass tables live in [`Coefficients`] and can be replaced
//! from YAML.

pub mod coefficients;
pub mod crop;
mod error;
pub mod forest;
pub mod landcover;
pub mod vegetation;

pub use coefficients::{Coefficients, CropCoefficients, ForestCoefficients, NdviRange};
pub use crop::{CropAnalysis, CropAnalyzer, CropCategory, CropRecord, CropSummary};
pub use error::AnalysisError;
pub use forest::{
    EstimationMethod, EstimationStrategy, ForestAnalyzer, ForestInput, ForestRecord,
};
pub use landcover::{AllocationFactors, LandCoverAnalyzer, LandCoverRecord};
pub use vegetation::{
    SpectralIndex, VegetationAnalyzer, VegetationIndices, VegetationThresholds,
};

/// Result type for coefficient loading.
pub type Result<T> = std::result::Result<T, AnalysisError>;
