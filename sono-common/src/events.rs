//! Event types for the Sonoscope event system
//!
//! Provides the shared event definitions and the EventBus used for telemetry:
//! track lifecycle, cache collisions, worker state and playback transitions.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Transport state of the playback engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Playing,
    Paused,
    Stopped,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Playing => write!(f, "playing"),
            Transport::Paused => write!(f, "paused"),
            Transport::Stopped => write!(f, "stopped"),
        }
    }
}

/// Verification worker lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Paused => write!(f, "paused"),
        }
    }
}

/// Sonoscope event types
///
/// Events are broadcast via EventBus and can be serialized for external
/// transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SonoEvent {
    /// Track published to the store (placeholder or cache hit)
    TrackAdded {
        track_id: Uuid,
        key: String,
        /// False when the track was resolved from cache at ingestion
        is_loading: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Track removed from the playlist
    TrackRemoved {
        track_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Placeholder reconciled with authoritative metadata
    TrackVerified {
        key: String,
        /// Number of live track records patched
        tracks_patched: usize,
        from_cache: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Verification gave up on a key; placeholder metadata remains
    TrackVerificationFailed {
        key: String,
        attempts: u32,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Same digest written with different content; first write kept
    CacheCollision {
        key: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Cache write skipped (storage quota)
    CacheWriteSkipped {
        key: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Old cache entries removed
    CacheEvicted {
        count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    WorkerStateChanged {
        old_state: WorkerState,
        new_state: WorkerState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Transport changed (Playing/Paused/Stopped)
    PlaybackStateChanged {
        old_state: Transport,
        new_state: Transport,
        track_id: Option<Uuid>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Track reached its natural end
    TrackEnded {
        track_id: Uuid,
        has_next: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus
///
/// Thin wrapper over a tokio broadcast channel. Slow subscribers lag and lose
/// the oldest events instead of blocking emitters.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SonoEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use sono_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SonoEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SonoEvent) -> Result<usize, broadcast::error::SendError<SonoEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SonoEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit(SonoEvent::CacheCollision {
            key: "abc".to_string(),
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            SonoEvent::CacheCollision { key, .. } => assert_eq!(key, "abc"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus
            .emit(SonoEvent::CacheEvicted { count: 1, timestamp: chrono::Utc::now() })
            .is_err());

        // Lossy emit never fails
        bus.emit_lossy(SonoEvent::CacheEvicted { count: 1, timestamp: chrono::Utc::now() });
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SonoEvent::PlaybackStateChanged {
            old_state: Transport::Paused,
            new_state: Transport::Playing,
            track_id: None,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PlaybackStateChanged");
        assert_eq!(json["new_state"], "playing");
    }
}
