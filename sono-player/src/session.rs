//! Playlist-driven playback
//!
//! Consumes the track store's play requests: each request loads the track
//! (superseding any load still running) and starts it once decoded. A track
//! that fails to load is skipped like one that ended.

use crate::error::{PlaybackError, Result};
use crate::playback::PlaybackEngine;
use sono_common::{PlayRequest, TrackStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct PlayerSession {
    engine: PlaybackEngine,
    handle: JoinHandle<()>,
}

impl PlayerSession {
    /// Take over `tracks`' play requests; only one session per store
    pub async fn attach(engine: PlaybackEngine, tracks: &Arc<TrackStore>) -> Result<Self> {
        let requests = tracks
            .take_play_requests()
            .await
            .ok_or_else(|| PlaybackError::InvalidState("Play requests already consumed".to_string()))?;

        let handle = tokio::spawn(run_session(engine.clone(), requests));
        info!("Player session attached");
        Ok(Self { engine, handle })
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    /// Stop consuming requests; the engine keeps its current state
    pub fn detach(self) {
        self.handle.abort();
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_session(engine: PlaybackEngine, mut requests: mpsc::UnboundedReceiver<PlayRequest>) {
    while let Some(request) = requests.recv().await {
        let track_id = request.track.id;
        debug!(track_id = %track_id, index = request.index, "Play request");

        // load() supersedes the previous load before the task is spawned
        let load = engine.load(&request.track);
        let engine = engine.clone();
        tokio::spawn(async move {
            match load.await {
                Ok(_) => match engine.play_loaded(track_id).await {
                    Ok(true) => {}
                    Ok(false) => debug!(track_id = %track_id, "Track superseded before playback"),
                    Err(e) => warn!(track_id = %track_id, error = %e, "Failed to start playback"),
                },
                Err(e) if e.is_aborted() => debug!(track_id = %track_id, "Load superseded"),
                Err(e) => {
                    warn!(track_id = %track_id, error = %e, "Failed to load track, skipping");
                    if !engine.skip_failed_load(track_id).await {
                        debug!(track_id = %track_id, "Failed track already superseded");
                    }
                }
            }
        });
    }
    debug!("Play request channel closed");
}
