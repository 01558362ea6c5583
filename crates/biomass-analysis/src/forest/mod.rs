//! Forest biomass from FIA inventory, land cover and NDVI.
//!
//! Estimation runs an ordered chain of [`EstimationStrategy`] tiers
//! (tree level, plot level, regional average). Per-acre results are
//! scaled by the forest acres found in land cover, never the parcel total.

mod stand;
mod strategy;

pub use stand::{plot_harvest_probability, plot_weight, summarize, StandSummary};
pub use strategy::{
    default_chain, inventory_confidence, ndvi_density_factor, EstimationContext,
    EstimationMethod, EstimationStrategy, ForestEstimate, ForestInput, PlotLevel, Regional,
    TreeLevel, DEFAULT_TPA, LB_PER_TON, STEM_HARVESTABLE_SHARE,
};

use crate::coefficients::Coefficients;
use crate::crop::CorrelationClass;
use crate::landcover::{FOREST_MIN_ACRES, FOREST_MIN_PERCENT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-acre standing biomass outside this range is flagged.
const PLAUSIBLE_TONS_PER_ACRE: (f64, f64) = (10.0, 200.0);

/// How observed NDVI compares with a closed forest canopy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NdviCorrelation {
    pub observed_ndvi: Option<f64>,
    pub class: CorrelationClass,
    pub confidence: f64,
}

pub fn ndvi_correlation(ndvi: Option<f64>) -> NdviCorrelation {
    let (class, confidence) = match ndvi {
        None => (CorrelationClass::NoData, 0.5),
        Some(v) if (0.6..=0.85).contains(&v) => (CorrelationClass::Excellent, 0.95),
        Some(v) if (0.5..=0.9).contains(&v) => (CorrelationClass::Good, 0.85),
        Some(v) if (0.3..=0.95).contains(&v) => (CorrelationClass::Acceptable, 0.7),
        Some(_) => (CorrelationClass::Poor, 0.4),
    };
    NdviCorrelation {
        observed_ndvi: ndvi,
        class,
        confidence,
    }
}

/// Confidence from the amount of supporting evidence, independent of tier.
pub fn evidence_confidence(input: &ForestInput<'_>) -> f64 {
    let area = match input.forest_acres {
        a if a >= 5.0 => 0.9,
        a if a >= 1.0 => 0.8,
        a if a >= 0.5 => 0.7,
        _ => 0.6,
    };
    let pixels = match input.worldcover_pixels {
        n if n >= 100 => 0.9,
        n if n >= 50 => 0.8,
        n if n >= 20 => 0.7,
        _ => 0.6,
    };
    let plots = match input.plots.len() {
        n if n >= 5 => 0.9,
        n if n >= 2 => 0.8,
        1 => 0.7,
        _ => 0.5,
    };
    let ndvi = match input.ndvi {
        Some(v) if (0.5..=0.9).contains(&v) => 0.9,
        Some(v) if (0.3..=0.95).contains(&v) => 0.7,
        Some(_) => 0.5,
        None => 0.6,
    };
    (area + pixels + plots + ndvi) / 4.0
}

/// Forest biomass for one parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestRecord {
    pub forest_area_acres: f64,
    pub forest_percentage: f64,
    pub method: EstimationMethod,

    pub standing_biomass_tons: f64,
    pub harvestable_biomass_tons: f64,
    pub residue_biomass_tons: f64,
    pub standing_tons_per_acre: f64,
    pub harvestable_tons_per_acre: f64,
    pub residue_tons_per_acre: f64,

    pub tree_count_estimate: Option<f64>,
    pub average_dbh_inches: Option<f64>,
    pub average_height_feet: Option<f64>,
    pub stand: StandSummary,

    /// Confidence reported by the tier.
    pub estimate_confidence: f64,
    pub evidence_confidence: f64,
    pub confidence_score: f64,

    pub fia_plot_count: usize,
    pub fia_tree_count: usize,
    pub plots_used: usize,
    pub ndvi_correlation: NdviCorrelation,
    pub warnings: Vec<String>,
}

/// Runs the estimation chain for parcels with enough forest.
#[derive(Debug)]
pub struct ForestAnalyzer {
    coefficients: Arc<Coefficients>,
    reference_year: i32,
    strategies: Vec<Box<dyn EstimationStrategy>>,
}

impl ForestAnalyzer {
    pub fn new(coefficients: Arc<Coefficients>, reference_year: i32) -> Self {
        Self {
            coefficients,
            reference_year,
            strategies: default_chain(),
        }
    }

    /// Replace the estimation chain. Tiers are tried in order.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn EstimationStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn methods(&self) -> Vec<EstimationMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// Estimate forest biomass. `None` when the forest share is below the
    /// land-cover gate or no tier produced an estimate.
    pub fn analyze(&self, input: &ForestInput<'_>) -> Option<ForestRecord> {
        if !(input.forest_acres >= FOREST_MIN_ACRES && input.forest_percent >= FOREST_MIN_PERCENT)
        {
            return None;
        }
        let ctx = EstimationContext {
            coefficients: &self.coefficients,
            reference_year: self.reference_year,
        };

        let (strategy, estimate) = self.strategies.iter().find_map(|s| {
            if !s.is_applicable(input) {
                return None;
            }
            let estimate = s.estimate(input, &ctx);
            if estimate.is_none() {
                tracing::debug!(method = s.method().as_str(), "Tier produced no estimate");
            }
            estimate.map(|e| (s, e))
        })?;

        let acres = input.forest_acres;
        let evidence = evidence_confidence(input);
        let confidence_score = ((estimate.confidence + evidence) / 2.0)
            .min(strategy.confidence_ceiling())
            .clamp(0.0, 1.0);

        let mut record = ForestRecord {
            forest_area_acres: acres,
            forest_percentage: input.forest_percent,
            method: estimate.method,
            standing_biomass_tons: estimate.standing_tons_per_acre * acres,
            harvestable_biomass_tons: estimate.harvestable_tons_per_acre * acres,
            residue_biomass_tons: estimate.residue_tons_per_acre * acres,
            standing_tons_per_acre: estimate.standing_tons_per_acre,
            harvestable_tons_per_acre: estimate.harvestable_tons_per_acre,
            residue_tons_per_acre: estimate.residue_tons_per_acre,
            tree_count_estimate: estimate.trees_per_acre.map(|tpa| tpa * acres),
            average_dbh_inches: estimate.average_dbh_inches,
            average_height_feet: estimate.average_height_feet,
            stand: estimate.stand,
            estimate_confidence: estimate.confidence,
            evidence_confidence: evidence,
            confidence_score,
            fia_plot_count: input.plots.len(),
            fia_tree_count: input.trees.len(),
            plots_used: estimate.plots_used,
            ndvi_correlation: ndvi_correlation(input.ndvi),
            warnings: Vec::new(),
        };
        record.warnings = validate(&record);
        tracing::trace!(
            method = record.method.as_str(),
            tons = record.standing_biomass_tons,
            confidence = record.confidence_score,
            "Forest estimate"
        );
        Some(record)
    }
}

fn validate(record: &ForestRecord) -> Vec<String> {
    let mut warnings = Vec::new();
    let (low, high) = PLAUSIBLE_TONS_PER_ACRE;
    if record.standing_tons_per_acre < low {
        warnings.push(format!(
            "very low biomass density: {:.1} tons/acre",
            record.standing_tons_per_acre
        ));
    } else if record.standing_tons_per_acre > high {
        warnings.push(format!(
            "very high biomass density: {:.1} tons/acre",
            record.standing_tons_per_acre
        ));
    }
    if record.confidence_score < 0.5 {
        warnings.push(format!("low confidence: {:.2}", record.confidence_score));
    }
    warnings
}
