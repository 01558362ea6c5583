//! Crop yield and residue from CDL crop intersections.

use crate::coefficients::{Coefficients, NdviRange};
use crate::vegetation::VegetationIndices;
use biomass_common::{m2_to_acres, CropIntersection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Crop records smaller than this are noise.
pub const MIN_CROP_ACRES: f64 = 0.01;

const MAJOR_GRAINS: &[i32] = &[1, 5, 21, 22, 23, 24, 27, 28];
const SPECIALTY: &[i32] = &[41, 42, 43, 44, 45, 46, 47, 48, 49, 50];
const FORAGE: &[i32] = &[36, 37, 58, 59, 60];
const OTHER: &[i32] = &[2, 3, 4, 6, 10, 11, 12, 13, 14, 31, 32, 33, 34, 35, 38, 39, 51, 52, 53];

/// Codes CDL classifies most reliably.
const RELIABLE_CDL_CODES: &[i32] = &[1, 5, 24, 36];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropCategory {
    MajorGrains,
    Specialty,
    Forage,
    Other,
    OtherCrops,
}

impl CropCategory {
    pub fn for_code(code: i32) -> Self {
        if MAJOR_GRAINS.contains(&code) {
            CropCategory::MajorGrains
        } else if SPECIALTY.contains(&code) {
            CropCategory::Specialty
        } else if FORAGE.contains(&code) {
            CropCategory::Forage
        } else if OTHER.contains(&code) {
            CropCategory::Other
        } else {
            CropCategory::OtherCrops
        }
    }
}

/// How well observed NDVI matches what a cover type should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationClass {
    Excellent,
    Good,
    Acceptable,
    Poor,
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VegetationCorrelation {
    pub expected: NdviRange,
    pub observed_ndvi: Option<f64>,
    pub class: CorrelationClass,
    pub confidence: f64,
}

/// Yield and residue for one crop code on one parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropRecord {
    pub crop_code: i32,
    pub crop_name: String,
    pub category: CropCategory,
    pub area_acres: f64,
    pub coverage_percent: f64,
    pub yield_tons: f64,
    pub residue_tons_wet: f64,
    pub residue_tons_dry: f64,
    pub harvestable_residue_tons: f64,
    pub moisture_content: f64,
    pub residue_ratio: f64,
    pub confidence_score: f64,
    pub vegetation: Option<VegetationCorrelation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub crops: usize,
    pub acres: f64,
    pub yield_tons: f64,
    pub harvestable_residue_tons: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CropSummary {
    pub total_crops: usize,
    pub total_acres: f64,
    pub total_yield_tons: f64,
    pub total_residue_wet_tons: f64,
    pub total_residue_dry_tons: f64,
    pub total_harvestable_residue_tons: f64,
    pub average_yield_per_acre: f64,
    /// Largest crop by area.
    pub dominant_crop: Option<String>,
    pub categories: BTreeMap<CropCategory, CategoryTotals>,
}

impl CropSummary {
    fn from_records(records: &[CropRecord]) -> Self {
        let mut summary = CropSummary {
            total_crops: records.len(),
            ..CropSummary::default()
        };
        for r in records {
            summary.total_acres += r.area_acres;
            summary.total_yield_tons += r.yield_tons;
            summary.total_residue_wet_tons += r.residue_tons_wet;
            summary.total_residue_dry_tons += r.residue_tons_dry;
            summary.total_harvestable_residue_tons += r.harvestable_residue_tons;
            let totals = summary.categories.entry(r.category).or_default();
            totals.crops += 1;
            totals.acres += r.area_acres;
            totals.yield_tons += r.yield_tons;
            totals.harvestable_residue_tons += r.harvestable_residue_tons;
        }
        if summary.total_acres > 0.0 {
            summary.average_yield_per_acre = summary.total_yield_tons / summary.total_acres;
        }
        summary.dominant_crop = records
            .iter()
            .max_by(|a, b| a.area_acres.total_cmp(&b.area_acres))
            .map(|r| r.crop_name.clone());
        summary
    }
}

/// Crop analysis of one parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropAnalysis {
    /// Largest area first.
    pub records: Vec<CropRecord>,
    pub summary: CropSummary,
    /// Area-weighted mean of the record confidences.
    pub confidence_score: f64,
    /// Scale applied to CDL areas to fit the land-cover cropland acres.
    pub allocation_factor: f64,
    pub warnings: Vec<String>,
}

impl CropAnalysis {
    pub fn total_acres(&self) -> f64 {
        self.summary.total_acres
    }

    pub fn total_yield_tons(&self) -> f64 {
        self.summary.total_yield_tons
    }

    /// Residue that can be removed from the field.
    pub fn total_residue_tons(&self) -> f64 {
        self.summary.total_harvestable_residue_tons
    }
}

fn area_factor(acres: f64) -> f64 {
    if acres >= 1.0 {
        0.9
    } else if acres >= 0.5 {
        0.8
    } else if acres >= 0.1 {
        0.7
    } else {
        0.5
    }
}

fn coverage_factor(percent: f64) -> f64 {
    if percent >= 80.0 {
        0.9
    } else if percent >= 50.0 {
        0.8
    } else if percent >= 20.0 {
        0.7
    } else {
        0.6
    }
}

fn crop_type_factor(code: i32) -> f64 {
    if RELIABLE_CDL_CODES.contains(&code) {
        0.9
    } else if MAJOR_GRAINS.contains(&code) {
        0.8
    } else {
        0.7
    }
}

/// Converts CDL intersections into crop yield and residue.
#[derive(Debug, Clone)]
pub struct CropAnalyzer {
    coefficients: Arc<Coefficients>,
}

impl CropAnalyzer {
    pub fn new(coefficients: Arc<Coefficients>) -> Self {
        Self { coefficients }
    }

    /// Compare a parcel's NDVI with the range expected for a crop.
    pub fn vegetation_correlation(
        &self,
        crop_code: i32,
        vegetation: &VegetationIndices,
    ) -> VegetationCorrelation {
        let expected = self.coefficients.expected_ndvi(crop_code);
        let observed = vegetation.ndvi_mean();
        let (class, confidence) = match observed {
            None => (CorrelationClass::NoData, 0.5),
            Some(ndvi) if expected.contains(ndvi) => (CorrelationClass::Good, 0.9),
            Some(ndvi) if (ndvi - expected.midpoint()).abs() < 0.2 => {
                (CorrelationClass::Acceptable, 0.7)
            }
            Some(_) => (CorrelationClass::Poor, 0.4),
        };
        VegetationCorrelation {
            expected,
            observed_ndvi: observed,
            class,
            confidence,
        }
    }

    fn record(
        &self,
        intersection: &CropIntersection,
        scale: f64,
        vegetation: Option<&VegetationIndices>,
    ) -> CropRecord {
        let code = intersection.crop_code;
        let c = self.coefficients.crop(code);
        let area_acres = m2_to_acres(intersection.intersection_area_m2) * scale;
        let yield_tons = area_acres * c.yield_tons_per_acre;
        let residue_tons_wet = yield_tons * c.residue_ratio;
        let residue_tons_dry = residue_tons_wet * (1.0 - c.moisture_content);
        let harvestable_residue_tons = residue_tons_dry * c.harvestable_residue;

        let correlation = vegetation.map(|v| self.vegetation_correlation(code, v));
        let mut factors = vec![
            area_factor(area_acres),
            coverage_factor(intersection.coverage_percent),
        ];
        if let Some(correlation) = &correlation {
            factors.push(correlation.confidence);
        }
        factors.push(crop_type_factor(code));
        let confidence_score = factors.iter().sum::<f64>() / factors.len() as f64;

        CropRecord {
            crop_code: code,
            crop_name: self.coefficients.crop_name(code),
            category: CropCategory::for_code(code),
            area_acres,
            coverage_percent: intersection.coverage_percent,
            yield_tons,
            residue_tons_wet,
            residue_tons_dry,
            harvestable_residue_tons,
            moisture_content: c.moisture_content,
            residue_ratio: c.residue_ratio,
            confidence_score,
            vegetation: correlation,
        }
    }

    /// Analyze a parcel's crop intersections.
    ///
    /// When `cropland_acres` is known from land cover and the CDL areas add
    /// up to more, every crop is scaled down to fit it. `None` when no
    /// crop covers at least [`MIN_CROP_ACRES`].
    pub fn analyze(
        &self,
        intersections: &[CropIntersection],
        cropland_acres: Option<f64>,
        vegetation: Option<&VegetationIndices>,
    ) -> Option<CropAnalysis> {
        let cdl_acres: f64 = intersections
            .iter()
            .map(|i| m2_to_acres(i.intersection_area_m2))
            .sum();
        let allocation_factor = match cropland_acres {
            Some(cropland) if cdl_acres > cropland && cdl_acres > 0.0 => cropland / cdl_acres,
            _ => 1.0,
        };

        let mut records: Vec<CropRecord> = intersections
            .iter()
            .map(|i| self.record(i, allocation_factor, vegetation))
            .filter(|r| r.area_acres >= MIN_CROP_ACRES)
            .collect();
        if records.is_empty() {
            return None;
        }
        records.sort_by(|a, b| b.area_acres.total_cmp(&a.area_acres));

        let summary = CropSummary::from_records(&records);
        let confidence_score = if summary.total_acres > 0.0 {
            records
                .iter()
                .map(|r| r.confidence_score * r.area_acres)
                .sum::<f64>()
                / summary.total_acres
        } else {
            0.0
        };
        let warnings = validate(intersections, &records);
        Some(CropAnalysis {
            records,
            summary,
            confidence_score,
            allocation_factor,
            warnings,
        })
    }
}

fn validate(intersections: &[CropIntersection], records: &[CropRecord]) -> Vec<String> {
    let mut warnings = Vec::new();
    let coverage: f64 = intersections.iter().map(|i| i.coverage_percent).sum();
    if coverage > 105.0 {
        warnings.push(format!("crop coverage sums to {coverage:.1}%"));
    }
    for r in records.iter().filter(|r| r.confidence_score < 0.5) {
        warnings.push(format!(
            "low confidence for {}: {:.2}",
            r.crop_name, r.confidence_score
        ));
    }
    let small = records.iter().filter(|r| r.area_acres < 0.05).count();
    if small * 2 > records.len() {
        warnings.push(format!("{small} of {} crop areas are very small", records.len()));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vegetation::IndexStats;
    use approx::assert_relative_eq;
    use biomass_common::ACRES_PER_M2;

    fn analyzer() -> CropAnalyzer {
        CropAnalyzer::new(Arc::new(Coefficients::default()))
    }

    fn intersection(code: i32, acres: f64, coverage: f64) -> CropIntersection {
        let area = acres / ACRES_PER_M2;
        CropIntersection {
            crop_code: code,
            intersection_area_m2: area,
            parcel_area_m2: area * 100.0 / coverage,
            coverage_percent: coverage,
        }
    }

    fn vegetation(ndvi: Option<f64>) -> VegetationIndices {
        VegetationIndices {
            tile_id: "15TWG".into(),
            acquisition_date: None,
            ndvi: ndvi.map(|mean| IndexStats {
                mean,
                std_dev: 0.05,
                pixel_count: 500,
            }),
            evi: None,
            savi: None,
            ndwi: None,
            pixel_count: 500,
            confidence_score: 0.8,
            classification: None,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_corn_coefficients() {
        let analysis = analyzer()
            .analyze(&[intersection(1, 40.0, 80.0)], None, None)
            .unwrap();
        let corn = &analysis.records[0];
        assert_eq!(corn.crop_name, "Corn");
        assert_eq!(corn.category, CropCategory::MajorGrains);
        assert_relative_eq!(corn.area_acres, 40.0, epsilon = 1e-9);
        assert_relative_eq!(corn.yield_tons, 168.0, epsilon = 1e-9);
        assert_relative_eq!(corn.residue_tons_wet, 201.6, epsilon = 1e-9);
        assert_relative_eq!(corn.residue_tons_dry, 171.36, epsilon = 1e-9);
        assert_relative_eq!(corn.harvestable_residue_tons, 68.544, epsilon = 1e-9);
        // Area 0.9, coverage 0.9, CDL reliability 0.9.
        assert_relative_eq!(corn.confidence_score, 0.9, epsilon = 1e-12);
        assert_relative_eq!(analysis.total_residue_tons(), 68.544, epsilon = 1e-9);
        assert_eq!(analysis.allocation_factor, 1.0);
    }

    #[test]
    fn test_sorting_summary_and_noise() {
        let analysis = analyzer()
            .analyze(
                &[
                    intersection(5, 2.0, 20.0),
                    intersection(1, 6.0, 60.0),
                    intersection(999, 1.5, 15.0),
                    intersection(24, 0.005, 0.05),
                ],
                None,
                None,
            )
            .unwrap();
        let codes: Vec<i32> = analysis.records.iter().map(|r| r.crop_code).collect();
        assert_eq!(codes, vec![1, 5, 999]);
        let summary = &analysis.summary;
        assert_eq!(summary.total_crops, 3);
        assert_eq!(summary.dominant_crop.as_deref(), Some("Corn"));
        assert_eq!(summary.categories[&CropCategory::MajorGrains].crops, 2);
        assert_eq!(summary.categories[&CropCategory::OtherCrops].crops, 1);
        // Unlisted codes use the default yield.
        assert_relative_eq!(analysis.records[2].yield_tons, 3.0, epsilon = 1e-9);
        assert_relative_eq!(
            summary.average_yield_per_acre,
            (6.0 * 4.2 + 2.0 * 1.6 + 3.0) / 9.5,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_scaled_to_cropland() {
        let analysis = analyzer()
            .analyze(&[intersection(1, 10.0, 100.0)], Some(8.0), None)
            .unwrap();
        assert_relative_eq!(analysis.allocation_factor, 0.8, epsilon = 1e-9);
        let corn = &analysis.records[0];
        assert_relative_eq!(corn.area_acres, 8.0, epsilon = 1e-9);
        assert_relative_eq!(corn.yield_tons, corn.area_acres * 4.2, epsilon = 1e-9);
    }

    #[test]
    fn test_vegetation_factor() {
        let a = analyzer();
        let crops = [intersection(1, 40.0, 80.0)];
        let good = a.analyze(&crops, None, Some(&vegetation(Some(0.6)))).unwrap();
        let poor = a.analyze(&crops, None, Some(&vegetation(Some(0.05)))).unwrap();
        let missing = a.analyze(&crops, None, Some(&vegetation(None))).unwrap();
        assert_eq!(
            good.records[0].vegetation.unwrap().class,
            CorrelationClass::Good
        );
        assert_eq!(
            a.vegetation_correlation(61, &vegetation(Some(0.35))).class,
            CorrelationClass::Acceptable
        );
        assert_eq!(poor.records[0].vegetation.unwrap().class, CorrelationClass::Poor);
        assert_eq!(
            missing.records[0].vegetation.unwrap().class,
            CorrelationClass::NoData
        );
        assert!(good.confidence_score > missing.confidence_score);
        assert!(missing.confidence_score > poor.confidence_score);
    }

    #[test]
    fn test_nothing_above_noise_floor() {
        assert!(analyzer()
            .analyze(&[intersection(1, 0.002, 1.0)], None, None)
            .is_none());
        assert!(analyzer().analyze(&[], None, None).is_none());
    }

    #[test]
    fn test_warnings() {
        let analysis = analyzer()
            .analyze(
                &[
                    intersection(1, 0.02, 70.0),
                    intersection(5, 0.03, 60.0),
                    intersection(999, 0.2, 5.0),
                ],
                None,
                None,
            )
            .unwrap();
        assert!(analysis.warnings.iter().any(|w| w.contains("coverage")));
        assert!(analysis.warnings.iter().any(|w| w.contains("very small")));
    }
}
