//! Error types for coordinate operations.

use thiserror::Error;

/// Errors that can occur while transforming coordinates or parsing tile IDs.
#[derive(Debug, Error)]
pub enum CoordError {
    /// No projection definition is known for the EPSG code.
    #[error("Unknown EPSG code {0}")]
    UnknownEpsg(u32),

    /// The projection library rejected a definition or a point.
    #[error("Projection EPSG:{from} -> EPSG:{to} failed: {reason}")]
    Projection {
        /// Source EPSG code.
        from: u32,
        /// Target EPSG code.
        to: u32,
        /// Library error text.
        reason: String,
    },

    /// A tile ID that does not look like `<zone><band><square>`.
    #[error("Invalid MGRS tile ID: {0}")]
    InvalidTileId(String),
}
