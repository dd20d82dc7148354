//! Error types for gateway item decoding and window parsing.

use thiserror::Error;

/// Errors that can occur when decoding gateway items or parsing
/// aggregation windows.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A field required for a reading is absent.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// The item carries a device type this deployment does not accept.
    #[error("Unsupported item type: {0}")]
    UnsupportedType(String),

    /// The supplied timestamp could not be interpreted.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The aggregation window token is not `<n>m` or `<n>h`.
    #[error("Invalid window spec '{0}': expected a positive integer followed by 'm' or 'h'")]
    InvalidWindowSpec(String),
}

/// Result type alias using sensorhub-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
