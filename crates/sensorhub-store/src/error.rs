//! Error types for sensorhub-store.

use std::path::PathBuf;

/// Result type for sensorhub-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sensorhub-store.
///
/// Every variant is a storage fault: the operation that produced it did not
/// take effect and is never retried internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored timestamp (Unix milliseconds) is outside the representable range.
    #[error("Invalid timestamp: {0} ms")]
    InvalidTimestamp(i64),

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
