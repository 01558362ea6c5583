//! Runner errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// A configuration or run-state file could not be read or written.
    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] biomass_store::StoreError),

    #[error(transparent)]
    Tiles(#[from] biomass_tiles::TileError),

    #[error(transparent)]
    Analysis(#[from] biomass_analysis::AnalysisError),

    /// Setup for a county failed; nothing was processed.
    #[error("county {county_fips} aborted: {reason}")]
    CountyAborted { county_fips: String, reason: String },

    /// A worker thread could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl RunnerError {
    pub fn aborted(county_fips: impl Into<String>, reason: impl Into<String>) -> Self {
        RunnerError::CountyAborted {
            county_fips: county_fips.into(),
            reason: reason.into(),
        }
    }
}
