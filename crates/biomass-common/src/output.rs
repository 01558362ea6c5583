//! Per-parcel results, skip reasons and county checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a parcel produced no record. Skips are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidGeometry,
    TooSmall,
    NoBiomassDetected,
}

impl SkipReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InvalidGeometry => "invalid_geometry",
            SkipReason::TooSmall => "too_small",
            SkipReason::NoBiomassDetected => "no_biomass_detected",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input sources that contributed to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    WorldCover,
    Sentinel2,
    Cdl,
    Fia,
    RegionalDefault,
}

impl DataSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataSource::WorldCover => "worldcover",
            DataSource::Sentinel2 => "sentinel2",
            DataSource::Cdl => "cdl",
            DataSource::Fia => "fia",
            DataSource::RegionalDefault => "regional_default",
        }
    }
}

/// Spectral index means over a parcel. `None` when the index could not be
/// computed (missing band or no valid pixels).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexValues {
    pub ndvi: Option<f64>,
    pub evi: Option<f64>,
    pub savi: Option<f64>,
    pub ndwi: Option<f64>,
}

/// One parcel's biomass estimate for one processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomassRecord {
    pub parcel_id: String,
    pub county_fips: String,
    pub total_acres: f64,
    pub centroid_lon: f64,
    pub centroid_lat: f64,
    pub forest_acres: f64,
    pub cropland_acres: f64,
    pub other_acres: f64,
    pub forest_percentage: f64,
    pub cropland_percentage: f64,
    pub forest_biomass_tons: f64,
    pub forest_harvestable_tons: f64,
    pub forest_residue_tons: f64,
    pub crop_yield_tons: f64,
    pub crop_residue_tons: f64,
    pub total_biomass_tons: f64,
    pub indices: IndexValues,
    pub confidence_score: f64,
    pub data_sources: Vec<DataSource>,
    /// Run bucket; at most one record per parcel per bucket.
    pub processing_timestamp: DateTime<Utc>,
    pub landcover_analysis: Option<serde_json::Value>,
    pub forest_analysis: Option<serde_json::Value>,
    pub crop_analysis: Option<serde_json::Value>,
}

impl BiomassRecord {
    /// Clamp tonnages to be non-negative and confidence to `[0, 1]`, and
    /// recompute the derived totals.
    pub fn normalize(&mut self) {
        for v in [
            &mut self.forest_acres,
            &mut self.cropland_acres,
            &mut self.forest_biomass_tons,
            &mut self.forest_harvestable_tons,
            &mut self.forest_residue_tons,
            &mut self.crop_yield_tons,
            &mut self.crop_residue_tons,
        ] {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
            }
        }
        self.other_acres = (self.total_acres - self.forest_acres - self.cropland_acres).max(0.0);
        self.total_biomass_tons =
            self.forest_biomass_tons + self.crop_yield_tons + self.crop_residue_tons;
        self.confidence_score = if self.confidence_score.is_finite() {
            self.confidence_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.data_sources.sort();
        self.data_sources.dedup();
    }

    /// Check the output invariants.
    pub fn is_well_formed(&self) -> bool {
        let tonnages = [
            self.forest_biomass_tons,
            self.forest_harvestable_tons,
            self.forest_residue_tons,
            self.crop_yield_tons,
            self.crop_residue_tons,
            self.total_biomass_tons,
        ];
        (0.0..=1.0).contains(&self.confidence_score)
            && tonnages.iter().all(|t| t.is_finite() && *t >= 0.0)
    }
}

/// County checkpoint state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Completed,
}

impl CheckpointStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(CheckpointStatus::InProgress),
            "completed" => Some(CheckpointStatus::Completed),
            _ => None,
        }
    }
}

/// Resume point for a county, written after each saved batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Five-digit state + county FIPS.
    pub county_fips: String,
    /// Last batch whose results were saved.
    pub batch_num: u32,
    /// Offset of the next parcel to load.
    pub parcel_offset: u64,
    pub parcels_processed: u64,
    pub parcels_skipped: u64,
    pub errors_count: u64,
    pub status: CheckpointStatus,
    /// Run bucket the saved records belong to.
    pub processing_timestamp: DateTime<Utc>,
    pub checkpoint_timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BiomassRecord {
        BiomassRecord {
            parcel_id: "p1".into(),
            county_fips: "19055".into(),
            total_acres: 10.0,
            centroid_lon: -91.5,
            centroid_lat: 42.5,
            forest_acres: 6.0,
            cropland_acres: 7.0,
            other_acres: 0.0,
            forest_percentage: 60.0,
            cropland_percentage: 70.0,
            forest_biomass_tons: 100.0,
            forest_harvestable_tons: -3.0,
            forest_residue_tons: 20.0,
            crop_yield_tons: 5.0,
            crop_residue_tons: 2.0,
            total_biomass_tons: 0.0,
            indices: IndexValues::default(),
            confidence_score: 1.4,
            data_sources: vec![DataSource::Fia, DataSource::Cdl, DataSource::Fia],
            processing_timestamp: Utc::now(),
            landcover_analysis: None,
            forest_analysis: None,
            crop_analysis: None,
        }
    }

    #[test]
    fn test_normalize_clamps() {
        let mut r = record();
        assert!(!r.is_well_formed());
        r.normalize();
        assert!(r.is_well_formed());
        assert_eq!(r.confidence_score, 1.0);
        assert_eq!(r.forest_harvestable_tons, 0.0);
        assert_eq!(r.other_acres, 0.0);
        assert_eq!(r.total_biomass_tons, 107.0);
        assert_eq!(r.data_sources, vec![DataSource::Cdl, DataSource::Fia]);
    }

    #[test]
    fn test_skip_reason_codes() {
        assert_eq!(SkipReason::NoBiomassDetected.to_string(), "no_biomass_detected");
        assert_eq!(
            serde_json::to_string(&SkipReason::TooSmall).unwrap(),
            "\"too_small\""
        );
        assert_eq!(CheckpointStatus::parse("completed"), Some(CheckpointStatus::Completed));
        assert_eq!(CheckpointStatus::parse("done"), None);
    }
}
