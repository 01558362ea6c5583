//! Error types for the spatial store.

use crate::StoreKind;
use rusqlite::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the relational stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON column encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored geometry could not be decoded.
    #[error("Geometry error: {0}")]
    Geometry(#[from] biomass_common::GeometryError),

    /// No pooled connection became free in time.
    #[error("Timed out after {waited:?} waiting for a {store} connection")]
    PoolTimeout {
        /// Logical store.
        store: StoreKind,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A checkpoint write would move an in-progress county backwards.
    #[error(
        "Checkpoint for county {county_fips} would regress from batch {current} to {attempted}"
    )]
    CheckpointRegression {
        /// Five-digit county FIPS.
        county_fips: String,
        /// Batch number already recorded.
        current: u32,
        /// Batch number that was rejected.
        attempted: u32,
    },

    /// A stored value could not be interpreted.
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

impl StoreError {
    /// True for failures worth retrying: a busy or locked database, a file
    /// that could not be opened yet, or an exhausted pool.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
            ),
            StoreError::PoolTimeout { .. } => true,
            _ => false,
        }
    }
}
