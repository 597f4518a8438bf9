//! Error types for sono-ingest

use thiserror::Error;
use uuid::Uuid;

/// Metadata cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Store capacity exhausted
    #[error("Storage quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),
}

impl CacheError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, CacheError::QuotaExceeded { .. })
    }
}

/// Metadata extraction (DSP boundary) errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read audio: {0}")]
    ReadError(String),

    #[error("Extraction task failed: {0}")]
    Task(String),
}

/// External lookup errors (MusicBrainz, Cover Art Archive, AcoustID, fpcalc)
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Fingerprint error: {0}")]
    Fingerprint(String),
}

/// Ingestion and verification errors
#[derive(Debug, Error)]
pub enum IngestError {
    /// File rejected before any async work
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Track not found: {0}")]
    TrackNotFound(Uuid),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Common error: {0}")]
    Common(sono_common::Error),
}

impl From<sono_common::Error> for IngestError {
    fn from(err: sono_common::Error) -> Self {
        match err {
            sono_common::Error::Validation(msg) => IngestError::Validation(msg),
            other => IngestError::Common(other),
        }
    }
}

impl IngestError {
    pub fn is_validation(&self) -> bool {
        matches!(self, IngestError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_validation_maps_to_validation() {
        let err: IngestError = sono_common::Error::Validation("bad".into()).into();
        assert!(err.is_validation());

        let err: IngestError = sono_common::Error::Internal("x".into()).into();
        assert!(!err.is_validation());
    }
}
