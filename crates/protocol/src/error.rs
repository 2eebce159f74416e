//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering the fallible wire operations.
///
/// Multipart extraction itself never fails: malformed parts are skipped.
/// These errors come from the pieces that must reject their input outright,
/// such as boundary negotiation and the download header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    // Content-Type negotiation
    /// The request is not `multipart/form-data`.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// The `Content-Type` value carries no usable `boundary=` parameter.
    #[error("missing multipart boundary")]
    MissingBoundary,

    /// The boundary exceeds the length allowed by RFC 2046.
    #[error("boundary too long: {len} characters exceeds maximum of {max}")]
    BoundaryTooLong {
        /// Actual boundary length.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    // Download header
    /// The header line does not start with the expected prefix.
    #[error("invalid download header: {0}")]
    InvalidHeader(String),

    /// No newline was found within the header size limit.
    #[error("download header too long: exceeds maximum of {max} bytes")]
    HeaderTooLong {
        /// Maximum allowed header length.
        max: usize,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
