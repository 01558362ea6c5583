//! Error types for tile acquisition and decoding.

use thiserror::Error;

/// Errors that can occur while fetching or decoding raster tiles.
#[derive(Debug, Error)]
pub enum TileError {
    /// I/O error reading a local blob.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// HTTP request error when fetching blobs.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Coordinate transform failure.
    #[error("Coordinate error: {0}")]
    Coord(#[from] biomass_coords::CoordError),

    /// The blob does not exist.
    #[error("Blob not found: {container}/{name}")]
    NotFound {
        /// Storage container.
        container: String,
        /// Blob name within the container.
        name: String,
    },

    /// Remote storage answered with an unexpected status.
    #[error("Failed to download {container}/{name}: {reason}")]
    DownloadFailed {
        /// Storage container.
        container: String,
        /// Blob name within the container.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Invalid GeoTIFF - missing required tags.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// Unsupported data layout in the TIFF file.
    #[error("Unsupported TIFF data type: {0}")]
    UnsupportedDataType(String),

    /// The requested window does not overlap the raster.
    #[error("Window lies outside raster {0}")]
    OutsideRaster(String),
}

impl TileError {
    /// True for missing blobs, which mean "no data here" rather than a fault.
    pub fn is_not_found(&self) -> bool {
        match self {
            TileError::NotFound { .. } => true,
            TileError::HttpRequest(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            TileError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
