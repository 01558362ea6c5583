//! Single-parcel analysis: gather inputs, run the analyzers, build the
//! output record.

use crate::config::ProcessingConfig;
use crate::Result;
use biomass_analysis::forest::ForestInput;
use biomass_analysis::landcover::TREE_COVER;
use biomass_analysis::{
    Coefficients, CropAnalysis, CropAnalyzer, ForestAnalyzer, ForestRecord, LandCoverAnalyzer,
    LandCoverRecord, VegetationAnalyzer, VegetationIndices, VegetationThresholds,
};
use biomass_common::{BiomassRecord, DataSource, Parcel, SkipReason};
use biomass_store::SpatialStore;
use biomass_tiles::{Band, TileManager};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Confidence contributed by a parcel without vegetation indices.
pub const MISSING_VEGETATION_CONFIDENCE: f64 = 0.2;

/// What happened to one parcel.
#[derive(Debug, Clone, PartialEq)]
pub enum ParcelOutcome {
    Processed(Box<BiomassRecord>),
    Skipped(SkipReason),
    /// An input could not be read; the message is for logs.
    Failed(String),
}

impl ParcelOutcome {
    pub fn record(&self) -> Option<&BiomassRecord> {
        match self {
            ParcelOutcome::Processed(record) => Some(record),
            _ => None,
        }
    }
}

/// Everything the analyzers produced for a parcel.
#[derive(Debug, Clone, Default)]
pub struct ParcelAnalysis {
    pub landcover: Option<LandCoverRecord>,
    pub vegetation: Option<VegetationIndices>,
    pub crop: Option<CropAnalysis>,
    pub forest: Option<ForestRecord>,
}

impl ParcelAnalysis {
    /// Mean of the forest, crop and vegetation confidences present, with a
    /// fixed low factor standing in for missing vegetation.
    pub fn confidence(&self) -> f64 {
        let mut factors = Vec::with_capacity(3);
        if let Some(forest) = &self.forest {
            factors.push(forest.confidence_score);
        }
        if let Some(crop) = &self.crop {
            factors.push(crop.confidence_score);
        }
        factors.push(
            self.vegetation
                .as_ref()
                .map_or(MISSING_VEGETATION_CONFIDENCE, |v| v.confidence_score),
        );
        let mean = factors.iter().sum::<f64>() / factors.len() as f64;
        mean.clamp(0.0, 1.0)
    }

    pub fn data_sources(&self) -> Vec<DataSource> {
        let mut sources = Vec::new();
        if self.landcover.is_some() {
            sources.push(DataSource::WorldCover);
        }
        if self.vegetation.is_some() {
            sources.push(DataSource::Sentinel2);
        }
        if self.crop.is_some() {
            sources.push(DataSource::Cdl);
        }
        if let Some(forest) = &self.forest {
            sources.push(if forest.method.uses_fia() {
                DataSource::Fia
            } else {
                DataSource::RegionalDefault
            });
        }
        sources
    }
}

/// Runs every analyzer for one parcel. Shared by all workers.
#[derive(Debug)]
pub struct ParcelProcessor {
    store: Arc<SpatialStore>,
    tiles: Arc<TileManager>,
    config: ProcessingConfig,
    landcover: LandCoverAnalyzer,
    vegetation: VegetationAnalyzer,
    crop: CropAnalyzer,
    forest: ForestAnalyzer,
}

impl ParcelProcessor {
    pub fn new(
        store: Arc<SpatialStore>,
        tiles: Arc<TileManager>,
        coefficients: Arc<Coefficients>,
        thresholds: VegetationThresholds,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            store,
            tiles,
            landcover: LandCoverAnalyzer::new(),
            vegetation: VegetationAnalyzer::new(thresholds),
            crop: CropAnalyzer::new(coefficients.clone()),
            forest: ForestAnalyzer::new(coefficients, config.reference_year),
            config,
        }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Analyze a parcel. Store failures become [`ParcelOutcome::Failed`];
    /// missing tiles only remove their source.
    pub fn process(&self, parcel: &Parcel, timestamp: DateTime<Utc>) -> ParcelOutcome {
        let started = Instant::now();
        let outcome = match self.try_process(parcel, timestamp) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(parcel_id = %parcel.parcel_id, error = %e, "Parcel analysis failed");
                ParcelOutcome::Failed(e.to_string())
            }
        };
        metrics::histogram!(
            biomass_metrics::metric_defs::PARCEL_PROCESSING_TIME.name,
            "state" => parcel.state_fips.clone(),
            "county" => parcel.county_fips.clone()
        )
        .record(started.elapsed().as_secs_f64());
        outcome
    }

    fn try_process(&self, parcel: &Parcel, timestamp: DateTime<Utc>) -> Result<ParcelOutcome> {
        let geometry = &parcel.geometry;
        if !geometry.is_valid() || !parcel.area_acres.is_finite() {
            return Ok(ParcelOutcome::Skipped(SkipReason::InvalidGeometry));
        }
        if parcel.area_acres < self.config.min_parcel_acres {
            return Ok(ParcelOutcome::Skipped(SkipReason::TooSmall));
        }

        let analysis = self.analyze(parcel)?;
        if analysis.forest.is_none() && analysis.crop.is_none() {
            debug!(parcel_id = %parcel.parcel_id, "No forest or crop biomass");
            return Ok(ParcelOutcome::Skipped(SkipReason::NoBiomassDetected));
        }
        let record = build_record(parcel, &analysis, timestamp)?;
        trace!(
            parcel_id = %record.parcel_id,
            tons = record.total_biomass_tons,
            confidence = record.confidence_score,
            "Parcel processed"
        );
        Ok(ParcelOutcome::Processed(Box::new(record)))
    }

    /// Run the analyzers whose inputs are available.
    pub fn analyze(&self, parcel: &Parcel) -> Result<ParcelAnalysis> {
        let geometry = &parcel.geometry;
        let class_counts = self.tiles.world_cover_class_counts(geometry);
        let landcover = class_counts
            .as_ref()
            .and_then(|counts| self.landcover.analyze(counts, geometry.area_m2()));
        let vegetation = self
            .tiles
            .get_pixels_for_parcel(geometry, &Band::ALL)
            .and_then(|pixels| self.vegetation.analyze(&pixels));

        // Without land cover, CDL alone decides whether there is cropland.
        let crop = match &landcover {
            Some(lc) if !lc.has_cropland() => None,
            _ => {
                let intersections = self.store.get_crop_intersections(geometry)?;
                self.crop.analyze(
                    &intersections,
                    landcover.as_ref().map(|lc| lc.cropland_acres),
                    vegetation.as_ref(),
                )
            }
        };

        let forest = match &landcover {
            Some(lc) if lc.has_forest() => {
                let plots = self.store.get_nearby_forest_plots(
                    parcel.centroid_lon,
                    parcel.centroid_lat,
                    self.config.fia_radius_degrees,
                )?;
                let plot_ids: Vec<String> = plots.iter().map(|p| p.plot_id.clone()).collect();
                let trees = self.store.get_trees_for_plots(&plot_ids)?;
                self.forest.analyze(&ForestInput {
                    forest_acres: lc.forest_acres,
                    forest_percent: lc.forest_percentage,
                    worldcover_pixels: class_counts.as_ref().map_or(0, |c| c.count(TREE_COVER)),
                    plots: &plots,
                    trees: &trees,
                    ndvi: vegetation.as_ref().and_then(|v| v.ndvi_mean()),
                })
            }
            _ => None,
        };

        Ok(ParcelAnalysis {
            landcover,
            vegetation,
            crop,
            forest,
        })
    }
}

fn build_record(
    parcel: &Parcel,
    analysis: &ParcelAnalysis,
    timestamp: DateTime<Utc>,
) -> Result<BiomassRecord> {
    let total_acres = analysis
        .landcover
        .as_ref()
        .map_or(parcel.area_acres, |lc| lc.total_parcel_acres);
    let (forest_acres, forest_percentage) = match &analysis.landcover {
        Some(lc) if analysis.forest.is_some() => (lc.forest_acres, lc.forest_percentage),
        _ => (0.0, 0.0),
    };
    let cropland_acres = match (&analysis.landcover, &analysis.crop) {
        (Some(lc), Some(_)) => lc.cropland_acres,
        (None, Some(crop)) => crop.total_acres().min(total_acres),
        (_, None) => 0.0,
    };
    let cropland_percentage = if total_acres > 0.0 {
        cropland_acres / total_acres * 100.0
    } else {
        0.0
    };

    let forest = analysis.forest.as_ref();
    let crop = analysis.crop.as_ref();
    let mut record = BiomassRecord {
        parcel_id: parcel.parcel_id.clone(),
        county_fips: parcel.full_county_fips(),
        total_acres,
        centroid_lon: parcel.centroid_lon,
        centroid_lat: parcel.centroid_lat,
        forest_acres,
        cropland_acres,
        other_acres: 0.0,
        forest_percentage,
        cropland_percentage,
        forest_biomass_tons: forest.map_or(0.0, |f| f.standing_biomass_tons),
        forest_harvestable_tons: forest.map_or(0.0, |f| f.harvestable_biomass_tons),
        forest_residue_tons: forest.map_or(0.0, |f| f.residue_biomass_tons),
        crop_yield_tons: crop.map_or(0.0, |c| c.total_yield_tons()),
        crop_residue_tons: crop.map_or(0.0, |c| c.total_residue_tons()),
        total_biomass_tons: 0.0,
        indices: analysis
            .vegetation
            .as_ref()
            .map(|v| v.values())
            .unwrap_or_default(),
        confidence_score: analysis.confidence(),
        data_sources: analysis.data_sources(),
        processing_timestamp: timestamp,
        landcover_analysis: analysis
            .landcover
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?,
        forest_analysis: forest.map(serde_json::to_value).transpose()?,
        crop_analysis: crop.map(serde_json::to_value).transpose()?,
    };
    record.normalize();
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use biomass_analysis::forest::{EstimationMethod, ForestAnalyzer};
    use biomass_analysis::vegetation::IndexStats;

    fn vegetation(confidence: f64) -> VegetationIndices {
        VegetationIndices {
            tile_id: "15TWG".into(),
            acquisition_date: None,
            ndvi: Some(IndexStats {
                mean: 0.72,
                std_dev: 0.03,
                pixel_count: 400,
            }),
            evi: None,
            savi: None,
            ndwi: None,
            pixel_count: 400,
            confidence_score: confidence,
            classification: None,
            warnings: Vec::new(),
        }
    }

    fn regional_forest() -> ForestRecord {
        ForestAnalyzer::new(Arc::new(Coefficients::default()), 2025)
            .analyze(&ForestInput {
                forest_acres: 5.0,
                forest_percent: 50.0,
                worldcover_pixels: 200,
                plots: &[],
                trees: &[],
                ndvi: None,
            })
            .unwrap()
    }

    #[test]
    fn test_confidence_penalizes_missing_vegetation() {
        let forest = regional_forest();
        assert_eq!(forest.method, EstimationMethod::Regional);

        let with = ParcelAnalysis {
            forest: Some(forest.clone()),
            vegetation: Some(vegetation(0.9)),
            ..Default::default()
        };
        let without = ParcelAnalysis {
            forest: Some(forest),
            ..Default::default()
        };
        assert!((with.confidence() - 0.65).abs() < 1e-12);
        assert!((without.confidence() - 0.3).abs() < 1e-12);
        assert_eq!(
            with.data_sources(),
            vec![DataSource::Sentinel2, DataSource::RegionalDefault]
        );
    }

    #[test]
    fn test_empty_analysis_confidence() {
        assert_eq!(ParcelAnalysis::default().confidence(), MISSING_VEGETATION_CONFIDENCE);
        assert!(ParcelAnalysis::default().data_sources().is_empty());
    }
}
