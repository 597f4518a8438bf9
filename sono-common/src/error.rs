//! Common error types for Sonoscope

use thiserror::Error;

/// Common result type for Sonoscope operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Sonoscope crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File rejected before any processing (unsupported type, empty file)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (task join failure, broken invariant)
    #[error("Internal error: {0}")]
    Internal(String),
}
