//! Forest biomass estimation tiers.
//!
//! The analyzer walks an ordered chain of strategies and takes the first
//! one that has the data it needs and produces an estimate. Each tier caps
//! its own confidence.

use super::stand::{plot_weight, summarize, StandSummary};
use crate::coefficients::{Coefficients, UNKNOWN_FOREST_TYPE};
use biomass_common::{ForestPlot, PlotBiomass, TreeRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pounds per short ton.
pub const LB_PER_TON: f64 = 2000.0;

/// Trees per acre of a standard FIA subplot tree record.
pub const DEFAULT_TPA: f64 = 6.018046;

/// Share of stem wood counted as merchantable; the rest is residue.
pub const STEM_HARVESTABLE_SHARE: f64 = 0.8;

/// Tons per tree assumed by the regional tree count.
const REGIONAL_TONS_PER_TREE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    TreeLevel,
    PlotLevel,
    Regional,
}

impl EstimationMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EstimationMethod::TreeLevel => "tree_level",
            EstimationMethod::PlotLevel => "plot_level",
            EstimationMethod::Regional => "regional",
        }
    }

    /// Whether the estimate came from inventory measurements.
    pub const fn uses_fia(&self) -> bool {
        !matches!(self, EstimationMethod::Regional)
    }
}

/// Everything known about a parcel's forest.
#[derive(Debug, Clone, Copy)]
pub struct ForestInput<'a> {
    pub forest_acres: f64,
    pub forest_percent: f64,
    /// WorldCover pixels behind the forest share.
    pub worldcover_pixels: u64,
    /// Plots within the search radius, nearest first.
    pub plots: &'a [ForestPlot],
    /// Live trees on those plots.
    pub trees: &'a [TreeRecord],
    pub ndvi: Option<f64>,
}

/// Shared inputs of every tier.
#[derive(Debug, Clone, Copy)]
pub struct EstimationContext<'a> {
    pub coefficients: &'a Coefficients,
    /// Year treatment recency is measured from.
    pub reference_year: i32,
}

/// Per-acre biomass from one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestEstimate {
    pub method: EstimationMethod,
    pub standing_tons_per_acre: f64,
    pub harvestable_tons_per_acre: f64,
    pub residue_tons_per_acre: f64,
    pub trees_per_acre: Option<f64>,
    pub average_dbh_inches: Option<f64>,
    pub average_height_feet: Option<f64>,
    pub plots_used: usize,
    pub trees_used: usize,
    pub confidence: f64,
    pub stand: StandSummary,
}

pub trait EstimationStrategy: Send + Sync + std::fmt::Debug {
    fn method(&self) -> EstimationMethod;

    /// Upper bound on the confidence this tier reports.
    fn confidence_ceiling(&self) -> f64;

    /// Whether the input carries the data this tier needs.
    fn is_applicable(&self, input: &ForestInput<'_>) -> bool;

    fn estimate(
        &self,
        input: &ForestInput<'_>,
        ctx: &EstimationContext<'_>,
    ) -> Option<ForestEstimate>;
}

/// Tree-level, plot-level, then regional.
pub fn default_chain() -> Vec<Box<dyn EstimationStrategy>> {
    vec![
        Box::new(TreeLevel),
        Box::new(PlotLevel),
        Box::new(Regional),
    ]
}

/// Confidence from the number of plots and their mean inverse-distance
/// weight.
pub fn inventory_confidence(plot_count: usize, total_weight: f64, ceiling: f64) -> f64 {
    if plot_count == 0 {
        return 0.3_f64.min(ceiling);
    }
    let mut confidence = (0.4 + plot_count as f64 * 0.1).min(0.7);
    let mean_weight = total_weight / plot_count as f64;
    if mean_weight > 10.0 {
        confidence += 0.2;
    } else if mean_weight > 5.0 {
        confidence += 0.1;
    }
    confidence.min(ceiling)
}

/// Standing, harvestable and residue parts of a set of DRYBIO components.
fn partition(b: &PlotBiomass) -> [f64; 3] {
    [
        b.drybio_ag + b.drybio_bg,
        b.drybio_bole + b.drybio_sawlog + b.drybio_stem * STEM_HARVESTABLE_SHARE,
        b.drybio_branch
            + b.drybio_foliage
            + b.drybio_stump
            + b.drybio_stem * (1.0 - STEM_HARVESTABLE_SHARE),
    ]
}

fn tree_components(tree: &TreeRecord) -> PlotBiomass {
    PlotBiomass {
        drybio_ag: tree.drybio_ag,
        drybio_bg: tree.drybio_bg,
        drybio_bole: tree.drybio_bole,
        drybio_sawlog: tree.drybio_sawlog,
        drybio_stem: tree.drybio_stem,
        drybio_branch: tree.drybio_branch,
        drybio_foliage: tree.drybio_foliage,
        drybio_stump: tree.drybio_stump,
    }
}

/// Accumulates inverse-distance-weighted per-acre values.
#[derive(Default)]
struct Weighted {
    sums: [f64; 3],
    total_weight: f64,
}

impl Weighted {
    fn add(&mut self, values: [f64; 3], weight: f64) {
        for (sum, v) in self.sums.iter_mut().zip(values) {
            *sum += v * weight;
        }
        self.total_weight += weight;
    }

    fn means(&self) -> [f64; 3] {
        self.sums.map(|s| s / self.total_weight)
    }
}

/// Sums live-tree DRYBIO components per plot, expanded by trees per acre.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeLevel;

impl EstimationStrategy for TreeLevel {
    fn method(&self) -> EstimationMethod {
        EstimationMethod::TreeLevel
    }

    fn confidence_ceiling(&self) -> f64 {
        0.95
    }

    fn is_applicable(&self, input: &ForestInput<'_>) -> bool {
        !input.trees.is_empty()
    }

    fn estimate(
        &self,
        input: &ForestInput<'_>,
        ctx: &EstimationContext<'_>,
    ) -> Option<ForestEstimate> {
        let mut by_plot: BTreeMap<&str, Vec<&TreeRecord>> = BTreeMap::new();
        for tree in input.trees {
            by_plot.entry(tree.plot_id.as_str()).or_default().push(tree);
        }
        let plots: BTreeMap<&str, &ForestPlot> = input
            .plots
            .iter()
            .map(|p| (p.plot_id.as_str(), p))
            .collect();

        let mut biomass = Weighted::default();
        let mut tpa_sum = 0.0;
        let (mut dbh_sum, mut dbh_weight) = (0.0, 0.0);
        let (mut ht_sum, mut ht_weight) = (0.0, 0.0);
        let mut used_plots = Vec::new();

        for (plot_id, trees) in &by_plot {
            let plot = plots.get(plot_id).copied();
            let weight = plot_weight(plot.map_or(f64::NAN, |p| p.distance_degrees));
            let mut per_acre = [0.0; 3];
            let mut plot_tpa = 0.0;
            for tree in trees {
                let tpa = tree.tpa_unadj.filter(|t| *t > 0.0).unwrap_or(DEFAULT_TPA);
                let parts = partition(&tree_components(tree));
                for (acc, lb) in per_acre.iter_mut().zip(parts) {
                    *acc += lb * tpa / LB_PER_TON;
                }
                plot_tpa += tpa;
                if let Some(dia) = tree.dia.filter(|d| *d > 0.0) {
                    dbh_sum += dia * weight;
                    dbh_weight += weight;
                }
                if let Some(ht) = tree.ht.filter(|h| *h > 0.0) {
                    ht_sum += ht * weight;
                    ht_weight += weight;
                }
            }
            biomass.add(per_acre, weight);
            tpa_sum += plot_tpa * weight;
            if let Some(plot) = plot {
                used_plots.push(plot);
            }
        }
        if biomass.total_weight <= 0.0 {
            return None;
        }

        let [standing, harvestable, residue] = biomass.means();
        Some(ForestEstimate {
            method: self.method(),
            standing_tons_per_acre: standing,
            harvestable_tons_per_acre: harvestable,
            residue_tons_per_acre: residue,
            trees_per_acre: Some(tpa_sum / biomass.total_weight),
            average_dbh_inches: (dbh_weight > 0.0).then(|| dbh_sum / dbh_weight),
            average_height_feet: (ht_weight > 0.0).then(|| ht_sum / ht_weight),
            plots_used: by_plot.len(),
            trees_used: input.trees.len(),
            confidence: inventory_confidence(
                by_plot.len(),
                biomass.total_weight,
                self.confidence_ceiling(),
            ),
            stand: summarize(&used_plots, ctx.coefficients, ctx.reference_year),
        })
    }
}

/// Uses plot-aggregate DRYBIO fields when no trees are available.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlotLevel;

fn plot_biomass(plot: &ForestPlot) -> Option<&PlotBiomass> {
    plot.biomass.as_ref().filter(|b| b.drybio_ag > 0.0)
}

impl EstimationStrategy for PlotLevel {
    fn method(&self) -> EstimationMethod {
        EstimationMethod::PlotLevel
    }

    fn confidence_ceiling(&self) -> f64 {
        0.95
    }

    fn is_applicable(&self, input: &ForestInput<'_>) -> bool {
        input.plots.iter().any(|p| plot_biomass(p).is_some())
    }

    fn estimate(
        &self,
        input: &ForestInput<'_>,
        ctx: &EstimationContext<'_>,
    ) -> Option<ForestEstimate> {
        let mut biomass = Weighted::default();
        let mut used = Vec::new();
        for plot in input.plots {
            let Some(b) = plot_biomass(plot) else {
                continue;
            };
            biomass.add(partition(b), plot_weight(plot.distance_degrees));
            used.push(plot);
        }
        if used.is_empty() {
            return None;
        }

        let [standing, harvestable, residue] = biomass.means();
        Some(ForestEstimate {
            method: self.method(),
            standing_tons_per_acre: standing,
            harvestable_tons_per_acre: harvestable,
            residue_tons_per_acre: residue,
            trees_per_acre: None,
            average_dbh_inches: None,
            average_height_feet: None,
            plots_used: used.len(),
            trees_used: 0,
            confidence: inventory_confidence(
                used.len(),
                biomass.total_weight,
                self.confidence_ceiling(),
            ),
            stand: summarize(&used, ctx.coefficients, ctx.reference_year),
        })
    }
}

/// Static per-acre averages scaled by NDVI density.
#[derive(Debug, Clone, Copy, Default)]
pub struct Regional;

/// Standing biomass multiplier for canopy density read from NDVI.
pub fn ndvi_density_factor(ndvi: Option<f64>) -> f64 {
    match ndvi {
        Some(v) if v >= 0.7 => 1.2,
        Some(v) if v >= 0.5 => 1.0,
        Some(v) if v >= 0.3 => 0.8,
        Some(v) if v.is_finite() => 0.6,
        _ => 1.0,
    }
}

impl EstimationStrategy for Regional {
    fn method(&self) -> EstimationMethod {
        EstimationMethod::Regional
    }

    fn confidence_ceiling(&self) -> f64 {
        0.4
    }

    fn is_applicable(&self, _input: &ForestInput<'_>) -> bool {
        true
    }

    fn estimate(
        &self,
        input: &ForestInput<'_>,
        ctx: &EstimationContext<'_>,
    ) -> Option<ForestEstimate> {
        let forest = ctx.coefficients.regional_forest();
        let standing = forest.standing_tons_per_acre * ndvi_density_factor(input.ndvi);
        Some(ForestEstimate {
            method: self.method(),
            standing_tons_per_acre: standing,
            harvestable_tons_per_acre: standing * forest.harvestable_ratio,
            residue_tons_per_acre: standing * forest.residue_ratio,
            trees_per_acre: Some(standing / REGIONAL_TONS_PER_TREE),
            average_dbh_inches: Some(12.0),
            average_height_feet: Some(65.0),
            plots_used: 0,
            trees_used: 0,
            confidence: self.confidence_ceiling(),
            stand: StandSummary {
                stand_age_avg: Some(45.0),
                forest_type_dominant: UNKNOWN_FOREST_TYPE.to_string(),
                harvest_probability: 0.25,
                years_since_treatment: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use biomass_common::StandAttributes;

    fn ctx(coefficients: &Coefficients) -> EstimationContext<'_> {
        EstimationContext {
            coefficients,
            reference_year: 2025,
        }
    }

    fn plot(id: &str, distance: f64, biomass: Option<PlotBiomass>) -> ForestPlot {
        ForestPlot {
            plot_id: id.into(),
            lat: 42.0,
            lon: -92.5,
            inventory_year: Some(2020),
            distance_degrees: distance,
            biomass,
            stand: StandAttributes::default(),
        }
    }

    fn tree(plot_id: &str, ag: f64, stem: f64) -> TreeRecord {
        TreeRecord {
            tree_id: format!("{plot_id}-{ag}"),
            plot_id: plot_id.into(),
            species_code: Some(316),
            status_code: 1,
            dia: Some(10.0),
            ht: Some(60.0),
            tpa_unadj: Some(DEFAULT_TPA),
            drybio_ag: ag,
            drybio_bg: ag * 0.2,
            drybio_bole: ag * 0.5,
            drybio_sawlog: 0.0,
            drybio_stem: stem,
            drybio_branch: ag * 0.2,
            drybio_foliage: ag * 0.05,
            drybio_stump: ag * 0.05,
        }
    }

    fn input<'a>(plots: &'a [ForestPlot], trees: &'a [TreeRecord]) -> ForestInput<'a> {
        ForestInput {
            forest_acres: 10.0,
            forest_percent: 90.0,
            worldcover_pixels: 400,
            plots,
            trees,
            ndvi: Some(0.75),
        }
    }

    #[test]
    fn test_tree_level_expands_pounds_per_acre() {
        let coefficients = Coefficients::default();
        let plots = [plot("a", 0.0, None)];
        let trees = [tree("a", 1000.0, 100.0)];
        let estimate = TreeLevel
            .estimate(&input(&plots, &trees), &ctx(&coefficients))
            .unwrap();
        let to_tons = DEFAULT_TPA / LB_PER_TON;
        assert_relative_eq!(estimate.standing_tons_per_acre, 1200.0 * to_tons, epsilon = 1e-9);
        assert_relative_eq!(estimate.harvestable_tons_per_acre, 580.0 * to_tons, epsilon = 1e-9);
        assert_relative_eq!(estimate.residue_tons_per_acre, 320.0 * to_tons, epsilon = 1e-9);
        assert_relative_eq!(estimate.trees_per_acre.unwrap(), DEFAULT_TPA, epsilon = 1e-12);
        assert_eq!(estimate.average_dbh_inches, Some(10.0));
        // One plot: min(0.7, 0.5) + 0.2 for a weight of 100.
        assert_relative_eq!(estimate.confidence, 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_tree_level_weights_by_distance() {
        let coefficients = Coefficients::default();
        let plots = [plot("near", 0.0, None), plot("far", 0.99, None)];
        let trees = [tree("near", 1000.0, 0.0), tree("far", 2000.0, 0.0)];
        let estimate = TreeLevel
            .estimate(&input(&plots, &trees), &ctx(&coefficients))
            .unwrap();
        let to_tons = DEFAULT_TPA / LB_PER_TON;
        let expected = (1200.0 * 100.0 + 2400.0 * 1.0) / 101.0 * to_tons;
        assert_relative_eq!(estimate.standing_tons_per_acre, expected, epsilon = 1e-6);
        assert_eq!(estimate.plots_used, 2);
    }

    #[test]
    fn test_plot_level_skips_empty_plots() {
        let coefficients = Coefficients::default();
        let full = PlotBiomass {
            drybio_ag: 50.0,
            drybio_bg: 10.0,
            drybio_bole: 30.0,
            drybio_branch: 8.0,
            drybio_foliage: 2.0,
            drybio_stump: 3.0,
            ..PlotBiomass::default()
        };
        let plots = [
            plot("a", 0.05, Some(full)),
            plot("b", 0.02, Some(PlotBiomass::default())),
            plot("c", 0.01, None),
        ];
        let input = input(&plots, &[]);
        assert!(!TreeLevel.is_applicable(&input));
        assert!(PlotLevel.is_applicable(&input));
        let estimate = PlotLevel.estimate(&input, &ctx(&coefficients)).unwrap();
        assert_eq!(estimate.plots_used, 1);
        assert_relative_eq!(estimate.standing_tons_per_acre, 60.0, epsilon = 1e-12);
        assert_relative_eq!(estimate.harvestable_tons_per_acre, 30.0, epsilon = 1e-12);
        assert_relative_eq!(estimate.residue_tons_per_acre, 13.0, epsilon = 1e-12);
        assert!(!PlotLevel.is_applicable(&ForestInput {
            plots: &plots[1..],
            ..input
        }));
    }

    #[test]
    fn test_regional_density() {
        let coefficients = Coefficients::default();
        let mut input = input(&[], &[]);
        let dense = Regional.estimate(&input, &ctx(&coefficients)).unwrap();
        assert_relative_eq!(dense.standing_tons_per_acre, 120.0, epsilon = 1e-9);
        assert_relative_eq!(dense.harvestable_tons_per_acre, 78.0, epsilon = 1e-9);
        assert_eq!(dense.confidence, 0.4);

        input.ndvi = Some(0.1);
        let sparse = Regional.estimate(&input, &ctx(&coefficients)).unwrap();
        assert_relative_eq!(sparse.standing_tons_per_acre, 60.0, epsilon = 1e-9);

        input.ndvi = None;
        let unknown = Regional.estimate(&input, &ctx(&coefficients)).unwrap();
        assert_relative_eq!(unknown.standing_tons_per_acre, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_inventory_confidence() {
        assert_eq!(inventory_confidence(0, 0.0, 0.95), 0.3);
        // Far plots: no closeness bonus.
        assert_relative_eq!(inventory_confidence(2, 2.0, 0.95), 0.6, epsilon = 1e-12);
        assert_relative_eq!(inventory_confidence(2, 14.0, 0.95), 0.7, epsilon = 1e-12);
        assert_relative_eq!(inventory_confidence(10, 1000.0, 0.95), 0.9, epsilon = 1e-12);
        assert_relative_eq!(inventory_confidence(10, 1000.0, 0.85), 0.85, epsilon = 1e-12);
    }
}
