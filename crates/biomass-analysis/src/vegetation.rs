//! Spectral vegetation indices from Sentinel-2 reflectance.
//!
//! Each index reads only the bands it needs, so a band that could not be
//! fetched nulls the indices depending on it and leaves the rest intact.

use biomass_common::IndexValues;
use biomass_tiles::{Band, ClippedBand, ParcelPixels};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Sentinel-2 L2A digital numbers per unit reflectance.
pub const REFLECTANCE_SCALE: f64 = 10_000.0;

/// Soil brightness correction for SAVI.
const SAVI_L: f64 = 0.5;

/// The computed indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralIndex {
    Ndvi,
    Evi,
    Savi,
    Ndwi,
}

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 4] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Evi,
        SpectralIndex::Savi,
        SpectralIndex::Ndwi,
    ];

    pub const fn required_bands(&self) -> &'static [Band] {
        match self {
            SpectralIndex::Ndvi | SpectralIndex::Savi => &[Band::Red, Band::Nir],
            SpectralIndex::Evi => &[Band::Blue, Band::Red, Band::Nir],
            SpectralIndex::Ndwi => &[Band::Green, Band::Nir],
        }
    }

    /// Index value from reflectances ordered as `required_bands`.
    fn compute(&self, r: &[f64]) -> Option<f64> {
        let (numerator, denominator) = match self {
            SpectralIndex::Ndvi => (r[1] - r[0], r[1] + r[0]),
            SpectralIndex::Evi => (2.5 * (r[2] - r[1]), r[2] + 6.0 * r[1] - 7.5 * r[0] + 1.0),
            SpectralIndex::Savi => ((1.0 + SAVI_L) * (r[1] - r[0]), r[1] + r[0] + SAVI_L),
            SpectralIndex::Ndwi => (r[0] - r[1], r[0] + r[1]),
        };
        (denominator != 0.0).then(|| numerator / denominator)
    }
}

/// Thresholds for one index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexThresholds {
    pub min_valid: f64,
    pub max_valid: f64,
    pub healthy_min: f64,
    pub dense_min: f64,
}

impl Default for IndexThresholds {
    fn default() -> Self {
        Self {
            min_valid: -1.0,
            max_valid: 1.0,
            healthy_min: 0.3,
            dense_min: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterThresholds {
    pub water_min: f64,
    pub wet_vegetation_min: f64,
}

impl Default for WaterThresholds {
    fn default() -> Self {
        Self {
            water_min: 0.3,
            wet_vegetation_min: 0.1,
        }
    }
}

/// Vegetation thresholds, configurable under `vegetation_thresholds`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VegetationThresholds {
    pub ndvi: IndexThresholds,
    pub evi: IndexThresholds,
    pub savi: IndexThresholds,
    pub ndwi: WaterThresholds,
}

impl Default for VegetationThresholds {
    fn default() -> Self {
        let soil_adjusted = IndexThresholds {
            healthy_min: 0.2,
            dense_min: 0.6,
            ..IndexThresholds::default()
        };
        Self {
            ndvi: IndexThresholds::default(),
            evi: soil_adjusted,
            savi: soil_adjusted,
            ndwi: WaterThresholds::default(),
        }
    }
}

/// Mean and spread of one index over a parcel's valid pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub mean: f64,
    pub std_dev: f64,
    pub pixel_count: usize,
}

/// Coarse reading of a parcel's NDVI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VegetationClass {
    Dense,
    Healthy,
    Sparse,
    BareSoil,
    Water,
}

/// Vegetation indices for one parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationIndices {
    pub tile_id: String,
    pub acquisition_date: Option<String>,
    pub ndvi: Option<IndexStats>,
    pub evi: Option<IndexStats>,
    pub savi: Option<IndexStats>,
    pub ndwi: Option<IndexStats>,
    /// Pixels behind NDVI, or the best-covered index without it.
    pub pixel_count: usize,
    pub confidence_score: f64,
    /// NDVI class, or `Water` when NDWI marks open water.
    pub classification: Option<VegetationClass>,
    pub warnings: Vec<String>,
}

impl VegetationIndices {
    pub fn stats(&self, index: SpectralIndex) -> Option<&IndexStats> {
        match index {
            SpectralIndex::Ndvi => self.ndvi.as_ref(),
            SpectralIndex::Evi => self.evi.as_ref(),
            SpectralIndex::Savi => self.savi.as_ref(),
            SpectralIndex::Ndwi => self.ndwi.as_ref(),
        }
    }

    pub fn ndvi_mean(&self) -> Option<f64> {
        self.ndvi.map(|s| s.mean)
    }

    /// Number of indices that could be computed.
    pub fn index_count(&self) -> usize {
        SpectralIndex::ALL
            .iter()
            .filter(|i| self.stats(**i).is_some())
            .count()
    }

    /// Means for the output record.
    pub fn values(&self) -> IndexValues {
        IndexValues {
            ndvi: self.ndvi.map(|s| s.mean),
            evi: self.evi.map(|s| s.mean),
            savi: self.savi.map(|s| s.mean),
            ndwi: self.ndwi.map(|s| s.mean),
        }
    }
}

/// Computes vegetation indices from clipped Sentinel-2 pixels.
#[derive(Debug, Clone, Default)]
pub struct VegetationAnalyzer {
    thresholds: VegetationThresholds,
}

impl VegetationAnalyzer {
    pub fn new(thresholds: VegetationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &VegetationThresholds {
        &self.thresholds
    }

    /// Indices for a parcel, or `None` when no index had a valid pixel.
    pub fn analyze(&self, pixels: &ParcelPixels) -> Option<VegetationIndices> {
        let stats = |index| index_stats(pixels, index);
        let ndvi = stats(SpectralIndex::Ndvi);
        let evi = stats(SpectralIndex::Evi);
        let savi = stats(SpectralIndex::Savi);
        let ndwi = stats(SpectralIndex::Ndwi);

        let pixel_count = match ndvi {
            Some(s) => s.pixel_count,
            None => [evi, savi, ndwi]
                .iter()
                .flatten()
                .map(|s| s.pixel_count)
                .max()?,
        };

        let mut indices = VegetationIndices {
            tile_id: pixels.tile_id.clone(),
            acquisition_date: pixels.acquisition_date.clone(),
            ndvi,
            evi,
            savi,
            ndwi,
            pixel_count,
            confidence_score: 0.0,
            classification: None,
            warnings: Vec::new(),
        };
        indices.confidence_score = self.confidence(&indices);
        indices.classification = if self.is_water(&indices) {
            Some(VegetationClass::Water)
        } else {
            indices.ndvi_mean().map(|ndvi| self.classify(ndvi))
        };
        indices.warnings = self.validate(&indices);
        if !indices.warnings.is_empty() {
            tracing::debug!(tile = %indices.tile_id, warnings = ?indices.warnings, "Vegetation warnings");
        }
        tracing::trace!(
            tile = %indices.tile_id,
            pixels = pixel_count,
            indices = indices.index_count(),
            "Vegetation indices"
        );
        Some(indices)
    }

    /// Mean of the pixel-count, NDVI-range, NDVI-spread and completeness
    /// factors.
    fn confidence(&self, indices: &VegetationIndices) -> f64 {
        let mut factors = Vec::with_capacity(4);
        if indices.pixel_count > 0 {
            factors.push((indices.pixel_count as f64 / 100.0).min(1.0));
        }
        if let Some(ndvi) = indices.ndvi {
            let t = &self.thresholds.ndvi;
            factors.push(if ndvi.mean < t.min_valid || ndvi.mean > t.max_valid {
                0.3
            } else if ndvi.mean >= t.healthy_min {
                0.9
            } else if ndvi.mean >= 0.0 {
                0.7
            } else {
                0.5
            });
            factors.push((1.0 - (ndvi.std_dev / 0.1).min(1.0)).max(0.3));
        }
        factors.push(match indices.index_count() {
            4 => 0.9,
            3 => 0.8,
            2 => 0.6,
            _ => 0.3,
        });
        factors.iter().mean()
    }

    pub fn classify(&self, ndvi: f64) -> VegetationClass {
        let t = &self.thresholds.ndvi;
        if ndvi >= t.dense_min {
            VegetationClass::Dense
        } else if ndvi >= t.healthy_min {
            VegetationClass::Healthy
        } else if ndvi >= 0.1 {
            VegetationClass::Sparse
        } else if ndvi >= 0.0 {
            VegetationClass::BareSoil
        } else {
            VegetationClass::Water
        }
    }

    /// Whether NDWI indicates open water.
    pub fn is_water(&self, indices: &VegetationIndices) -> bool {
        indices
            .ndwi
            .is_some_and(|s| s.mean >= self.thresholds.ndwi.water_min)
    }

    /// Plausibility warnings for a parcel's indices.
    pub fn validate(&self, indices: &VegetationIndices) -> Vec<String> {
        let mut warnings = Vec::new();
        let t = &self.thresholds.ndvi;
        match indices.ndvi_mean() {
            Some(ndvi) if ndvi < t.min_valid || ndvi > t.max_valid => {
                warnings.push(format!("NDVI {ndvi:.3} outside valid range"))
            }
            Some(ndvi) if ndvi < -0.5 => warnings.push(format!(
                "very low NDVI {ndvi:.3}, likely water or bare soil"
            )),
            Some(_) => {}
            None => warnings.push("NDVI could not be calculated".to_string()),
        }
        if indices.pixel_count < 10 {
            warnings.push(format!("low pixel count {}", indices.pixel_count));
        }
        if indices.acquisition_date.is_none() {
            warnings.push("no acquisition date".to_string());
        }
        warnings
    }
}

/// Stats of one index over pixels where every required band is finite and
/// positive.
fn index_stats(pixels: &ParcelPixels, index: SpectralIndex) -> Option<IndexStats> {
    let bands: Vec<&ClippedBand> = index
        .required_bands()
        .iter()
        .map(|b| pixels.band(*b))
        .collect::<Option<_>>()?;
    let (width, height) = (bands[0].width, bands[0].height);

    let mut values = Vec::new();
    let mut reflectance = [0.0; 3];
    for row in 0..height {
        'pixel: for col in 0..width {
            for (slot, band) in reflectance.iter_mut().zip(&bands) {
                let dn = band.value(col, row);
                if !dn.is_finite() || dn <= 0.0 {
                    continue 'pixel;
                }
                *slot = f64::from(dn) / REFLECTANCE_SCALE;
            }
            if let Some(v) = index.compute(&reflectance[..bands.len()]) {
                if v.is_finite() {
                    values.push(v);
                }
            }
        }
    }
    if values.is_empty() {
        return None;
    }
    Some(IndexStats {
        mean: values.iter().mean(),
        std_dev: values.iter().population_std_dev(),
        pixel_count: values.len(),
    })
}
