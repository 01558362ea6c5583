//! Stand attributes aggregated over nearby plots.

use crate::coefficients::Coefficients;
use biomass_common::ForestPlot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Added to plot distances before inverting.
pub const DISTANCE_OFFSET_DEGREES: f64 = 0.01;

/// Distance assumed for plots without one.
pub const UNKNOWN_DISTANCE_DEGREES: f64 = 1.0;

const BASE_HARVEST_PROBABILITY: f64 = 0.1;
const PRIVATE_OWNERSHIP_BONUS: f64 = 0.2;
const NATIONAL_FOREST_BONUS: f64 = 0.05;
const RECENT_TREATMENT_BONUS: f64 = 0.15;
const PAST_TREATMENT_BONUS: f64 = 0.05;
pub const MAX_HARVEST_PROBABILITY: f64 = 0.8;

/// Inverse-distance weight of a plot.
pub fn plot_weight(distance_degrees: f64) -> f64 {
    let distance = if distance_degrees.is_finite() && distance_degrees >= 0.0 {
        distance_degrees
    } else {
        UNKNOWN_DISTANCE_DEGREES
    };
    1.0 / (distance + DISTANCE_OFFSET_DEGREES)
}

/// Stand characteristics of the plots behind an estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandSummary {
    /// Distance-weighted age of plots with a recorded age.
    pub stand_age_avg: Option<f64>,
    pub forest_type_dominant: String,
    pub harvest_probability: f64,
    /// Years since the most recent recorded treatment.
    pub years_since_treatment: Option<i32>,
}

/// Harvest likelihood of one plot: base rate, ownership and treatment
/// recency, capped.
pub fn plot_harvest_probability(plot: &ForestPlot, reference_year: i32) -> f64 {
    let mut probability = BASE_HARVEST_PROBABILITY;
    match plot.stand.ownership_group {
        Some(40..=45) => probability += PRIVATE_OWNERSHIP_BONUS,
        Some(10..=12) => probability += NATIONAL_FOREST_BONUS,
        _ => {}
    }
    for &year in &plot.stand.treatment_years {
        if year <= 0 || year > reference_year {
            continue;
        }
        let years_since = reference_year - year;
        if years_since < 10 {
            probability += RECENT_TREATMENT_BONUS;
        } else if years_since < 20 {
            probability += PAST_TREATMENT_BONUS;
        }
    }
    probability.min(MAX_HARVEST_PROBABILITY)
}

pub fn summarize(
    plots: &[&ForestPlot],
    coefficients: &Coefficients,
    reference_year: i32,
) -> StandSummary {
    let mut age_sum = 0.0;
    let mut age_weight = 0.0;
    let mut harvest_sum = 0.0;
    let mut total_weight = 0.0;
    let mut type_weights: BTreeMap<Option<i32>, f64> = BTreeMap::new();
    let mut latest_treatment: Option<i32> = None;

    for plot in plots {
        let weight = plot_weight(plot.distance_degrees);
        if let Some(age) = plot.stand.stand_age.filter(|a| *a > 0.0) {
            age_sum += age * weight;
            age_weight += weight;
        }
        *type_weights.entry(plot.stand.forest_type_code).or_insert(0.0) += weight;
        harvest_sum += plot_harvest_probability(plot, reference_year) * weight;
        total_weight += weight;
        let latest = plot
            .stand
            .treatment_years
            .iter()
            .copied()
            .filter(|y| *y > 0 && *y <= reference_year)
            .max();
        latest_treatment = latest_treatment.max(latest);
    }

    let dominant = type_weights
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .and_then(|(code, _)| code);

    StandSummary {
        stand_age_avg: (age_weight > 0.0).then(|| age_sum / age_weight),
        forest_type_dominant: coefficients.forest_type_name(dominant),
        harvest_probability: if total_weight > 0.0 {
            harvest_sum / total_weight
        } else {
            BASE_HARVEST_PROBABILITY
        },
        years_since_treatment: latest_treatment.map(|y| reference_year - y),
    }
}
