//! Error types for the analyzers.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading coefficient tables or serializing analyses.
///
/// Analysis itself does not fail: missing inputs yield `None` results.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The coefficient file could not be read.
    #[error("failed to read coefficients from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The coefficient file is not valid YAML for the expected shape.
    #[error("invalid coefficient file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A coefficient is out of its meaningful range.
    #[error("invalid coefficient {name}: {value}")]
    InvalidCoefficient { name: String, value: f64 },

    /// An analysis could not be serialized for storage.
    #[error("failed to serialize analysis: {0}")]
    Json(#[from] serde_json::Error),
}
