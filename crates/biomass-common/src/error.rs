//! Error types for the shared model.

use thiserror::Error;

/// Errors raised while decoding or validating parcel geometry.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// WKB buffer ended before the geometry was complete.
    #[error("WKB buffer truncated at byte {offset}")]
    Truncated {
        /// Byte offset where more data was expected.
        offset: usize,
    },

    /// Unknown byte-order marker.
    #[error("Invalid WKB byte order marker {0}")]
    InvalidByteOrder(u8),

    /// Geometry type other than Polygon or MultiPolygon.
    #[error("Unsupported WKB geometry type {0}")]
    UnsupportedType(u32),

    /// A polygon without an exterior ring.
    #[error("Polygon has no rings")]
    NoRings,
}
