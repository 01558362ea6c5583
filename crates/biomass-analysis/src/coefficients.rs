//! Static yield and biomass coefficient tables.
//!
//! The built-in tables are regional averages. A YAML file can replace
//! individual entries without a rebuild:
//!
//! ```yaml
//! crops:
//!   1: { yield_tons_per_acre: 4.6, residue_ratio: 1.1, moisture_content: 0.15, harvestable_residue: 0.4 }
//! regional_forest: { standing_tons_per_acre: 95.0, harvestable_ratio: 0.65, residue_ratio: 0.38 }
//! ```

use crate::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Yield and residue characteristics of one crop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropCoefficients {
    /// Grain or forage yield, tons per acre.
    pub yield_tons_per_acre: f64,
    /// Residue mass per unit of yield.
    pub residue_ratio: f64,
    /// Water fraction of wet residue.
    pub moisture_content: f64,
    /// Fraction of dry residue that can be removed.
    pub harvestable_residue: f64,
}

impl CropCoefficients {
    const fn new(yield_tons_per_acre: f64, residue_ratio: f64, moisture: f64, harvestable: f64) -> Self {
        Self {
            yield_tons_per_acre,
            residue_ratio,
            moisture_content: moisture,
            harvestable_residue: harvestable,
        }
    }
}

/// Inclusive NDVI interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NdviRange {
    pub min: f64,
    pub max: f64,
}

impl NdviRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, ndvi: f64) -> bool {
        ndvi >= self.min && ndvi <= self.max
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Per-acre biomass for the regional forest fallback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestCoefficients {
    /// Standing dry biomass, tons per acre.
    pub standing_tons_per_acre: f64,
    /// Merchantable share of standing biomass.
    pub harvestable_ratio: f64,
    /// Residue share of standing biomass.
    pub residue_ratio: f64,
}

/// All coefficient tables consumed by the analyzers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficients {
    crops: BTreeMap<i32, CropCoefficients>,
    default_crop: CropCoefficients,
    crop_names: BTreeMap<i32, String>,
    expected_ndvi: BTreeMap<i32, NdviRange>,
    default_expected_ndvi: NdviRange,
    regional_forest: ForestCoefficients,
    forest_type_groups: BTreeMap<i32, String>,
}

const CROP_TABLE: &[(i32, CropCoefficients)] = &[
    (1, CropCoefficients::new(4.2, 1.2, 0.15, 0.40)),
    (2, CropCoefficients::new(0.8, 3.2, 0.10, 0.60)),
    (3, CropCoefficients::new(3.8, 1.5, 0.20, 0.35)),
    (4, CropCoefficients::new(3.1, 1.3, 0.15, 0.45)),
    (5, CropCoefficients::new(1.6, 1.5, 0.12, 0.25)),
    (21, CropCoefficients::new(2.1, 1.3, 0.14, 0.50)),
    (22, CropCoefficients::new(1.8, 1.8, 0.14, 0.60)),
    (23, CropCoefficients::new(1.9, 1.8, 0.14, 0.60)),
    (24, CropCoefficients::new(2.2, 1.8, 0.14, 0.60)),
    (27, CropCoefficients::new(1.7, 1.9, 0.14, 0.55)),
    (28, CropCoefficients::new(2.3, 1.4, 0.14, 0.45)),
    (36, CropCoefficients::new(3.8, 0.1, 0.20, 0.80)),
    (37, CropCoefficients::new(2.5, 0.1, 0.20, 0.75)),
    (41, CropCoefficients::new(28.5, 0.8, 0.75, 0.30)),
];

const DEFAULT_CROP: CropCoefficients = CropCoefficients::new(2.0, 1.0, 0.15, 0.40);

const CDL_NAMES: &[(i32, &str)] = &[
    (1, "Corn"), (2, "Cotton"), (3, "Rice"), (4, "Sorghum"), (5, "Soybeans"),
    (6, "Sunflower"), (10, "Peanuts"), (11, "Tobacco"), (12, "Sweet_Corn"),
    (13, "Pop_Orn_Corn"), (14, "Mint"), (21, "Barley"), (22, "Durum_Wheat"),
    (23, "Spring_Wheat"), (24, "Winter_Wheat"), (25, "Other_Small_Grains"),
    (26, "Dbl_Crop_WinWht_Soybeans"), (27, "Rye"), (28, "Oats"), (29, "Millet"),
    (30, "Speltz"), (31, "Canola"), (32, "Flaxseed"), (33, "Safflower"),
    (34, "Rape_Seed"), (35, "Mustard"), (36, "Alfalfa"), (37, "Other_Hay_Non_Alfalfa"),
    (38, "Camelina"), (39, "Buckwheat"), (41, "Sugarbeets"), (42, "Dry_Beans"),
    (43, "Potatoes"), (44, "Other_Crops"), (45, "Sugarcane"), (46, "Sweet_Potatoes"),
    (47, "Misc_Vegs_Fruits"), (48, "Watermelons"), (49, "Onions"), (50, "Cucumbers"),
    (51, "Chick_Peas"), (52, "Lentils"), (53, "Peas"), (54, "Tomatoes"),
    (55, "Caneberries"), (56, "Hops"), (57, "Herbs"), (58, "Clover_Wildflowers"),
    (59, "Sod_Grass_Seed"), (60, "Switchgrass"), (61, "Fallow_Idle_Cropland"),
    (63, "Forest"), (64, "Shrubland"), (65, "Barren"), (81, "Clouds_No_Data"),
    (82, "Developed"), (83, "Water"), (87, "Wetlands"), (88, "Nonag_Undefined"),
    (141, "Deciduous_Forest"), (142, "Evergreen_Forest"), (143, "Mixed_Forest"),
    (152, "Shrubland"), (176, "Grassland_Pasture"), (190, "Woody_Wetlands"),
    (195, "Herbaceous_Wetlands"),
];

const EXPECTED_NDVI: &[(i32, NdviRange)] = &[
    (1, NdviRange::new(0.4, 0.8)),
    (5, NdviRange::new(0.3, 0.7)),
    (24, NdviRange::new(0.2, 0.6)),
    (36, NdviRange::new(0.5, 0.9)),
    (61, NdviRange::new(0.1, 0.3)),
];

const DEFAULT_EXPECTED_NDVI: NdviRange = NdviRange::new(0.2, 0.8);

const REGIONAL_FOREST: ForestCoefficients = ForestCoefficients {
    standing_tons_per_acre: 100.0,
    harvestable_ratio: 0.65,
    residue_ratio: 0.38,
};

/// FIA forest type groups, keyed by the hundreds of the forest type code.
const FOREST_TYPE_GROUPS: &[(i32, &str)] = &[
    (100, "White/Red/Jack Pine Group"),
    (200, "Spruce/Fir Group"),
    (300, "Longleaf/Slash Pine Group"),
    (400, "Loblolly/Shortleaf Pine Group"),
    (500, "Oak/Pine Group"),
    (600, "Oak/Hickory Group"),
    (700, "Oak/Gum/Cypress Group"),
    (800, "Elm/Ash/Cottonwood Group"),
    (900, "Maple/Beech/Birch Group"),
];

/// Name used when no forest type is recorded.
pub const UNKNOWN_FOREST_TYPE: &str = "Mixed Forest";

impl Default for Coefficients {
    fn default() -> Self {
        Self {
            crops: CROP_TABLE.iter().copied().collect(),
            default_crop: DEFAULT_CROP,
            crop_names: CDL_NAMES.iter().map(|&(c, n)| (c, n.to_string())).collect(),
            expected_ndvi: EXPECTED_NDVI.iter().copied().collect(),
            default_expected_ndvi: DEFAULT_EXPECTED_NDVI,
            regional_forest: REGIONAL_FOREST,
            forest_type_groups: FOREST_TYPE_GROUPS
                .iter()
                .map(|&(c, n)| (c, n.to_string()))
                .collect(),
        }
    }
}

/// Entries read from a coefficient file. Anything left out keeps its
/// built-in value.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CoefficientFile {
    crops: BTreeMap<i32, CropCoefficients>,
    default_crop: Option<CropCoefficients>,
    crop_names: BTreeMap<i32, String>,
    expected_ndvi: BTreeMap<i32, NdviRange>,
    default_expected_ndvi: Option<NdviRange>,
    regional_forest: Option<ForestCoefficients>,
    forest_type_groups: BTreeMap<i32, String>,
}

impl Coefficients {
    /// Built-in tables with the entries of a YAML document applied on top.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: CoefficientFile = serde_yaml::from_str(yaml)?;
        let mut coefficients = Self::default();
        coefficients.crops.extend(file.crops);
        coefficients.crop_names.extend(file.crop_names);
        coefficients.expected_ndvi.extend(file.expected_ndvi);
        coefficients.forest_type_groups.extend(file.forest_type_groups);
        if let Some(crop) = file.default_crop {
            coefficients.default_crop = crop;
        }
        if let Some(range) = file.default_expected_ndvi {
            coefficients.default_expected_ndvi = range;
        }
        if let Some(forest) = file.regional_forest {
            coefficients.regional_forest = forest;
        }
        coefficients.validate()?;
        Ok(coefficients)
    }

    /// Load overrides from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let coefficients = Self::from_yaml_str(&yaml)?;
        tracing::info!(
            path = %path.display(),
            crops = coefficients.crops.len(),
            "Loaded coefficient tables"
        );
        Ok(coefficients)
    }

    fn validate(&self) -> Result<()> {
        fn check(name: String, value: f64, min: f64, max: f64) -> Result<()> {
            if value.is_finite() && value >= min && value <= max {
                Ok(())
            } else {
                Err(AnalysisError::InvalidCoefficient { name, value })
            }
        }

        let crops = self
            .crops
            .iter()
            .map(|(code, c)| (code.to_string(), c))
            .chain(std::iter::once(("default".to_string(), &self.default_crop)));
        for (code, c) in crops {
            check(format!("crops.{code}.yield_tons_per_acre"), c.yield_tons_per_acre, 0.0, f64::MAX)?;
            check(format!("crops.{code}.residue_ratio"), c.residue_ratio, 0.0, f64::MAX)?;
            check(format!("crops.{code}.moisture_content"), c.moisture_content, 0.0, 1.0)?;
            check(format!("crops.{code}.harvestable_residue"), c.harvestable_residue, 0.0, 1.0)?;
        }

        let ranges = self
            .expected_ndvi
            .iter()
            .map(|(code, r)| (code.to_string(), r))
            .chain(std::iter::once(("default".to_string(), &self.default_expected_ndvi)));
        for (code, range) in ranges {
            check(format!("expected_ndvi.{code}.min"), range.min, -1.0, 1.0)?;
            check(format!("expected_ndvi.{code}.max"), range.max, range.min, 1.0)?;
        }

        let forest = &self.regional_forest;
        check("regional_forest.standing_tons_per_acre".into(), forest.standing_tons_per_acre, 0.0, f64::MAX)?;
        check("regional_forest.harvestable_ratio".into(), forest.harvestable_ratio, 0.0, 1.0)?;
        check("regional_forest.residue_ratio".into(), forest.residue_ratio, 0.0, 1.0)?;
        Ok(())
    }

    /// Coefficients for a CDL code, falling back to the default crop.
    pub fn crop(&self, code: i32) -> &CropCoefficients {
        self.crops.get(&code).unwrap_or(&self.default_crop)
    }

    /// Whether the code has its own entry rather than the default.
    pub fn has_crop(&self, code: i32) -> bool {
        self.crops.contains_key(&code)
    }

    pub fn crop_name(&self, code: i32) -> String {
        self.crop_names
            .get(&code)
            .cloned()
            .unwrap_or_else(|| format!("CDL_{code}"))
    }

    pub fn expected_ndvi(&self, code: i32) -> NdviRange {
        self.expected_ndvi
            .get(&code)
            .copied()
            .unwrap_or(self.default_expected_ndvi)
    }

    pub fn regional_forest(&self) -> &ForestCoefficients {
        &self.regional_forest
    }

    /// Readable name of an FIA forest type code's group.
    pub fn forest_type_name(&self, code: Option<i32>) -> String {
        let Some(code) = code.filter(|c| *c > 0) else {
            return UNKNOWN_FOREST_TYPE.to_string();
        };
        self.forest_type_groups
            .get(&code)
            .or_else(|| self.forest_type_groups.get(&(code / 100 * 100)))
            .cloned()
            .unwrap_or_else(|| format!("Forest Type {code}"))
    }
}
