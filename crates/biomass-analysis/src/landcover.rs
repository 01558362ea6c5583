//! WorldCover land-cover breakdown of a parcel.
//!
//! Class areas are pixel fractions applied to the parcel's computed acres,
//! so `forest + cropland + other` always equals the parcel total. The
//! forest and cropland acres found here are the allocation basis for the
//! forest and crop estimates.

use biomass_common::{m2_to_acres, M2_PER_ACRE};
use biomass_tiles::{ClassCounts, WORLDCOVER_PIXEL_AREA_M2};
use serde::{Deserialize, Serialize};

pub const TREE_COVER: u8 = 10;
pub const SHRUBLAND: u8 = 20;
pub const GRASSLAND: u8 = 30;
pub const CROPLAND: u8 = 40;
pub const BUILT_UP: u8 = 50;
pub const PERMANENT_WATER: u8 = 80;

/// Forest below this many acres is treated as absent.
pub const FOREST_MIN_ACRES: f64 = 0.1;
/// Forest below this share of the parcel is treated as absent.
pub const FOREST_MIN_PERCENT: f64 = 5.0;
/// Cropland below this many acres is treated as absent.
pub const CROPLAND_MIN_ACRES: f64 = 0.1;

/// Readable name of a WorldCover class.
pub fn worldcover_class_name(class: u8) -> &'static str {
    match class {
        10 => "Tree_Cover",
        20 => "Shrubland",
        30 => "Grassland",
        40 => "Cropland",
        50 => "Built_Up",
        60 => "Bare_Sparse_Vegetation",
        70 => "Snow_Ice",
        80 => "Permanent_Water",
        90 => "Herbaceous_Wetland",
        95 => "Mangroves",
        100 => "Moss_Lichen",
        _ => "Unknown",
    }
}

/// Area of one WorldCover class within a parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassArea {
    pub class: u8,
    pub name: String,
    pub pixel_count: u64,
    pub area_acres: f64,
    pub percentage: f64,
}

/// Land-cover breakdown of one parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandCoverRecord {
    pub total_parcel_acres: f64,
    pub pixel_count: u64,
    pub classes: Vec<ClassArea>,
    pub forest_acres: f64,
    pub forest_percentage: f64,
    pub cropland_acres: f64,
    pub cropland_percentage: f64,
    pub grassland_acres: f64,
    pub developed_acres: f64,
    pub water_acres: f64,
    /// Everything that is neither forest nor cropland.
    pub other_acres: f64,
    /// Normalized Shannon diversity of the class distribution, 0 for a
    /// single class.
    pub fragmentation_index: f64,
    /// Share of the expected 10 m pixels that carried a class, at most 1.
    pub data_completeness: f64,
    pub allocation: AllocationFactors,
    pub warnings: Vec<String>,
}

/// Parcel shares per biomass-bearing cover type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationFactors {
    pub forest_factor: f64,
    pub crop_factor: f64,
    pub grassland_factor: f64,
    pub developed_factor: f64,
    pub water_factor: f64,
    /// Forest, cropland and grassland acres.
    pub productive_acres: f64,
}

impl LandCoverRecord {
    /// Forest passes both the area and the share gate.
    pub fn has_forest(&self) -> bool {
        self.forest_acres >= FOREST_MIN_ACRES && self.forest_percentage >= FOREST_MIN_PERCENT
    }

    pub fn has_cropland(&self) -> bool {
        self.cropland_acres >= CROPLAND_MIN_ACRES
    }

    pub fn allocation_factors(&self) -> AllocationFactors {
        let share = |acres: f64| {
            if self.total_parcel_acres > 0.0 {
                acres / self.total_parcel_acres
            } else {
                0.0
            }
        };
        AllocationFactors {
            forest_factor: share(self.forest_acres),
            crop_factor: share(self.cropland_acres),
            grassland_factor: share(self.grassland_acres),
            developed_factor: share(self.developed_acres),
            water_factor: share(self.water_acres),
            productive_acres: self.forest_acres + self.cropland_acres + self.grassland_acres,
        }
    }

    /// Data-quality warnings; empty when the breakdown looks sound.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.data_completeness < 0.8 {
            warnings.push(format!(
                "low data completeness: {:.0}%",
                self.data_completeness * 100.0
            ));
        }
        let total: f64 = self.classes.iter().map(|c| c.percentage).sum();
        if (total - 100.0).abs() > 5.0 {
            warnings.push(format!("class percentages sum to {total:.1}%"));
        }
        if self.fragmentation_index > 0.8 {
            warnings.push(format!(
                "high land use fragmentation: {:.2}",
                self.fragmentation_index
            ));
        }
        let expected = self.total_parcel_acres * M2_PER_ACRE / WORLDCOVER_PIXEL_AREA_M2;
        if (self.pixel_count as f64) < expected * 0.5 {
            warnings.push(format!(
                "low pixel count: {} (expected ~{expected:.0})",
                self.pixel_count
            ));
        }
        warnings
    }
}

/// Shannon entropy of the class distribution divided by `ln(classes)`.
pub fn fragmentation_index(counts: &ClassCounts) -> f64 {
    let total = counts.total();
    let classes = counts.iter().count();
    if total == 0 || classes <= 1 {
        return 0.0;
    }
    let entropy: f64 = counts
        .iter()
        .map(|(_, n)| n as f64 / total as f64)
        .filter(|p| *p > 0.0)
        .map(|p| -p * p.ln())
        .sum();
    entropy / (classes as f64).ln()
}

/// Turns WorldCover class histograms into land-cover records.
#[derive(Debug, Clone, Copy, Default)]
pub struct LandCoverAnalyzer;

impl LandCoverAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Break a parcel of `parcel_area_m2` down by the class histogram of its
    /// pixels. `None` when no pixel carried a class.
    pub fn analyze(&self, counts: &ClassCounts, parcel_area_m2: f64) -> Option<LandCoverRecord> {
        let pixel_count = counts.total();
        if pixel_count == 0 || !(parcel_area_m2 > 0.0) {
            return None;
        }
        let total_acres = m2_to_acres(parcel_area_m2);
        let fraction = |pixels: u64| pixels as f64 / pixel_count as f64;

        let classes: Vec<ClassArea> = counts
            .iter()
            .map(|(class, pixels)| ClassArea {
                class,
                name: worldcover_class_name(class).to_string(),
                pixel_count: pixels,
                area_acres: fraction(pixels) * total_acres,
                percentage: fraction(pixels) * 100.0,
            })
            .collect();

        let acres = |class: u8| fraction(counts.count(class)) * total_acres;
        let forest_acres = acres(TREE_COVER);
        let cropland_acres = acres(CROPLAND);
        let expected_pixels = parcel_area_m2 / WORLDCOVER_PIXEL_AREA_M2;

        let mut record = LandCoverRecord {
            total_parcel_acres: total_acres,
            pixel_count,
            forest_acres,
            forest_percentage: fraction(counts.count(TREE_COVER)) * 100.0,
            cropland_acres,
            cropland_percentage: fraction(counts.count(CROPLAND)) * 100.0,
            grassland_acres: acres(GRASSLAND),
            developed_acres: acres(BUILT_UP),
            water_acres: acres(PERMANENT_WATER),
            other_acres: (total_acres - forest_acres - cropland_acres).max(0.0),
            fragmentation_index: fragmentation_index(counts),
            data_completeness: (pixel_count as f64 / expected_pixels).min(1.0),
            classes,
            allocation: AllocationFactors::default(),
            warnings: Vec::new(),
        };
        record.allocation = record.allocation_factors();
        record.warnings = record.validate();
        if !record.warnings.is_empty() {
            tracing::debug!(warnings = ?record.warnings, "Land cover warnings");
        }
        tracing::trace!(
            forest_pct = record.forest_percentage,
            cropland_pct = record.cropland_percentage,
            pixels = pixel_count,
            "Land cover breakdown"
        );
        Some(record)
    }
}
