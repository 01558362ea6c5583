//! Application configuration.
//!
//! Every field has a default, so an empty file (or none at all) is a valid
//! configuration:
//!
//! ```yaml
//! stores:
//!   forestry: { path: data/forestry.db, max_connections: 20 }
//! tiles:
//!   backend: { type: http, base_url: "https://example.blob.core.windows.net" }
//! processing:
//!   batch_size: 500
//!   period: june
//! coefficients: coefficients.yaml
//! ```

use crate::{Result, RunnerError};
use biomass_analysis::{Coefficients, VegetationThresholds};
use biomass_store::StoreConfig;
use biomass_tiles::{Period, TileConfig};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parcel and batch processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub batch_size: u64,
    pub max_workers: usize,
    /// Sentinel-2 composite to read.
    pub period: Period,
    /// FIA plot search radius around a parcel centroid.
    pub fia_radius_degrees: f64,
    /// Parcels at or below this area are not loaded.
    pub min_parcel_acres: f64,
    /// Records below this confidence are counted as low confidence.
    pub confidence_threshold: f64,
    /// Time budget for one parcel.
    pub parcel_timeout_secs: u64,
    /// Year treatment recency is measured from.
    pub reference_year: i32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_workers: 4,
            period: Period::default(),
            fia_radius_degrees: 0.1,
            min_parcel_acres: 0.1,
            confidence_threshold: 0.5,
            parcel_timeout_secs: 300,
            reference_year: chrono::Utc::now().year(),
        }
    }
}

impl ProcessingConfig {
    pub fn parcel_timeout(&self) -> Duration {
        Duration::from_secs(self.parcel_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stores: StoreConfig,
    pub tiles: TileConfig,
    pub processing: ProcessingConfig,
    pub vegetation_thresholds: VegetationThresholds,
    /// YAML file overriding the built-in coefficient tables.
    pub coefficients: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a config file. A relative `coefficients` path is taken relative
    /// to the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| RunnerError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&yaml)?;
        if let (Some(coefficients), Some(dir)) = (&config.coefficients, path.parent()) {
            if coefficients.is_relative() {
                config.coefficients = Some(dir.join(coefficients));
            }
        }
        Ok(config)
    }

    /// Coefficient tables: the configured file, or the built-in ones.
    pub fn load_coefficients(&self) -> Result<Coefficients> {
        Ok(match &self.coefficients {
            Some(path) => Coefficients::load(path)?,
            None => Coefficients::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biomass_store::StoreKind;

    #[test]
    fn test_empty_config_is_default() {
        let config = AppConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.processing.batch_size, 1000);
        assert_eq!(config.processing.period, Period::August);
        assert_eq!(config.processing.parcel_timeout(), Duration::from_secs(300));
        let forestry = config.stores.settings(StoreKind::Forestry).resolve(StoreKind::Forestry);
        assert_eq!(forestry.max_connections, 20);
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_yaml_str(
            "processing:\n  batch_size: 250\n  period: june\n  reference_year: 2024\n\
             vegetation_thresholds:\n  ndvi:\n    healthy_min: 0.35\n",
        )
        .unwrap();
        assert_eq!(config.processing.batch_size, 250);
        assert_eq!(config.processing.period, Period::June);
        assert_eq!(config.processing.reference_year, 2024);
        assert_eq!(config.processing.max_workers, 4);
        assert_eq!(config.vegetation_thresholds.ndvi.healthy_min, 0.35);
        assert_eq!(config.vegetation_thresholds.ndvi.dense_min, 0.7);
    }

    #[test]
    fn test_relative_coefficients_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("coefficients.yaml"),
            "crops:\n  1: { yield_tons_per_acre: 5.0, residue_ratio: 1.0, moisture_content: 0.15, harvestable_residue: 0.4 }\n",
        )
        .unwrap();
        let config_path = dir.path().join("biomass.yaml");
        std::fs::write(&config_path, "coefficients: coefficients.yaml\n").unwrap();

        let config = AppConfig::load(&config_path).unwrap();
        assert_eq!(
            config.coefficients.as_deref(),
            Some(dir.path().join("coefficients.yaml").as_path())
        );
        let coefficients = config.load_coefficients().unwrap();
        assert_eq!(coefficients.crop(1).yield_tons_per_acre, 5.0);
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::load("/nonexistent/biomass.yaml").unwrap_err();
        assert!(matches!(err, RunnerError::File { .. }));
    }
}
