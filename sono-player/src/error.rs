//! Error types for sono-player

use thiserror::Error;

/// Playback engine error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// Audio bytes could not be probed or decoded
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// The load was superseded by a newer `load()` call
    #[error("Load aborted: superseded by a newer load")]
    Aborted,

    /// Operation not valid in the current transport state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    Output(String),

    /// `play()` called before any track finished loading
    #[error("No track loaded")]
    NotLoaded,
}

impl PlaybackError {
    /// Stable error name, mirrored by UI layers
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackError::Decode(_) => "DecodeError",
            PlaybackError::Aborted => "AbortError",
            PlaybackError::InvalidState(_) => "InvalidStateError",
            PlaybackError::Output(_) => "OutputError",
            PlaybackError::NotLoaded => "NotLoadedError",
        }
    }

    /// Supersession is not a failure; callers usually drop it silently
    pub fn is_aborted(&self) -> bool {
        matches!(self, PlaybackError::Aborted)
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_error_name() {
        assert_eq!(PlaybackError::Aborted.name(), "AbortError");
        assert!(PlaybackError::Aborted.is_aborted());
        assert!(!PlaybackError::NotLoaded.is_aborted());
        assert_eq!(PlaybackError::Decode("x".into()).name(), "DecodeError");
    }
}
