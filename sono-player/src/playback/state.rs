//! Published playback state

use serde::Serialize;
use sono_common::events::Transport;
use sono_common::TrackId;

/// Engine lifecycle, finer-grained than [`Transport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Nothing loaded yet
    Idle,
    Loading,
    /// Decoded, not started
    Ready,
    Playing,
    Paused,
    Stopped,
}

/// Snapshot pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackState {
    pub transport: Transport,
    /// Seconds
    pub current_time: f64,
    /// Seconds, 0 until a track is loaded
    pub duration: f64,
    pub volume: f32,
    pub is_muted: bool,
    pub track_id: Option<TrackId>,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        self.transport == Transport::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.transport == Transport::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.transport == Transport::Stopped
    }
}
