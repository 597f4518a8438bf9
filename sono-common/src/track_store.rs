//! Observable track store (the playlist)
//!
//! Holds the live [`AudioTrack`] records. The ingestor publishes placeholders
//! here, the verification worker patches them in place by content key, and the
//! playback engine reads it through [`PlaylistController`].
//!
//! Changes are observable through a revision counter on a `watch` channel;
//! play requests are delivered on an mpsc channel whose receiver is taken
//! once by the player session.

use crate::model::{AudioTrack, TrackId};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, warn};

/// Request from the playlist to start playing a track
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub index: usize,
    pub track: AudioTrack,
}

/// Playlist operations the playback engine depends on
#[async_trait]
pub trait PlaylistController: Send + Sync {
    /// Index of the track currently selected for playback
    async fn current_index(&self) -> Option<usize>;

    /// Number of tracks in the playlist
    async fn len(&self) -> usize;

    /// Select the track at `index` and request playback
    async fn play_track(&self, index: usize) -> Result<()>;
}

#[derive(Default)]
struct StoreInner {
    tracks: Vec<AudioTrack>,
    current_index: Option<usize>,
}

pub struct TrackStore {
    inner: RwLock<StoreInner>,
    revision: watch::Sender<u64>,
    play_tx: mpsc::UnboundedSender<PlayRequest>,
    play_rx: Mutex<Option<mpsc::UnboundedReceiver<PlayRequest>>>,
}

impl TrackStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        let (play_tx, play_rx) = mpsc::unbounded_channel();
        Self {
            inner: RwLock::new(StoreInner::default()),
            revision,
            play_tx,
            play_rx: Mutex::new(Some(play_rx)),
        }
    }

    /// Revision counter, bumped on every mutation
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Take the play request receiver (only once)
    pub async fn take_play_requests(&self) -> Option<mpsc::UnboundedReceiver<PlayRequest>> {
        self.play_rx.lock().await.take()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    /// Append a track; returns its index
    pub async fn add(&self, track: AudioTrack) -> usize {
        let index = {
            let mut inner = self.inner.write().await;
            inner.tracks.push(track);
            inner.tracks.len() - 1
        };
        self.bump();
        index
    }

    pub async fn get(&self, id: TrackId) -> Option<AudioTrack> {
        let inner = self.inner.read().await;
        inner.tracks.iter().find(|t| t.id == id).cloned()
    }

    pub async fn get_by_index(&self, index: usize) -> Option<AudioTrack> {
        self.inner.read().await.tracks.get(index).cloned()
    }

    /// Snapshot of all tracks in playlist order
    pub async fn tracks(&self) -> Vec<AudioTrack> {
        self.inner.read().await.tracks.clone()
    }

    /// Apply `patch` to every track whose content key is `key`
    ///
    /// Returns the number of records patched.
    pub async fn patch_by_key<F>(&self, key: &str, mut patch: F) -> usize
    where
        F: FnMut(&mut AudioTrack) + Send,
    {
        let patched = {
            let mut inner = self.inner.write().await;
            let mut count = 0;
            for track in inner.tracks.iter_mut().filter(|t| t.key == key) {
                patch(track);
                count += 1;
            }
            count
        };

        if patched > 0 {
            self.bump();
        }
        debug!(key = %key, patched, "Patched track records");
        patched
    }

    /// Remove a track; the current index follows the track it pointed at
    pub async fn remove(&self, id: TrackId) -> Option<AudioTrack> {
        let removed = {
            let mut inner = self.inner.write().await;
            let position = inner.tracks.iter().position(|t| t.id == id)?;
            let track = inner.tracks.remove(position);

            inner.current_index = match inner.current_index {
                Some(current) if current == position => None,
                Some(current) if current > position => Some(current - 1),
                other => other,
            };
            track
        };
        self.bump();
        Some(removed)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.tracks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.tracks.is_empty()
    }

    pub async fn current_index(&self) -> Option<usize> {
        self.inner.read().await.current_index
    }
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaylistController for TrackStore {
    async fn current_index(&self) -> Option<usize> {
        TrackStore::current_index(self).await
    }

    async fn len(&self) -> usize {
        TrackStore::len(self).await
    }

    async fn play_track(&self, index: usize) -> Result<()> {
        let track = {
            let mut inner = self.inner.write().await;
            let track = inner
                .tracks
                .get(index)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("No track at index {}", index)))?;
            inner.current_index = Some(index);
            track
        };
        self.bump();

        if self.play_tx.send(PlayRequest { index, track }).is_err() {
            warn!(index, "Play request dropped: no player session attached");
        }
        Ok(())
    }
}

/// Shared handle type used across crates
pub type SharedTrackStore = Arc<TrackStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaSource;

    fn track(key: &str, name: &str) -> AudioTrack {
        AudioTrack::placeholder(key, MediaSource::new(name, "audio/wav", vec![1u8, 2, 3]))
    }

    #[tokio::test]
    async fn test_patch_by_key_updates_all_matches() {
        let store = TrackStore::new();
        store.add(track("k1", "a.wav")).await;
        store.add(track("k2", "b.wav")).await;
        store.add(track("k1", "c.wav")).await;

        let patched = store
            .patch_by_key("k1", |t| {
                t.is_loading = false;
                t.metadata.artist = "Artist".into();
            })
            .await;

        assert_eq!(patched, 2);
        let tracks = store.tracks().await;
        assert!(!tracks[0].is_loading);
        assert!(tracks[1].is_loading);
        assert_eq!(tracks[2].metadata.artist, "Artist");
    }

    #[tokio::test]
    async fn test_remove_adjusts_current_index() {
        let store = TrackStore::new();
        let first = track("k1", "a.wav");
        let first_id = first.id;
        store.add(first).await;
        store.add(track("k2", "b.wav")).await;

        store.play_track(1).await.unwrap();
        assert_eq!(store.current_index().await, Some(1));

        store.remove(first_id).await.unwrap();
        assert_eq!(store.current_index().await, Some(0));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_play_track_emits_request() {
        let store = TrackStore::new();
        store.add(track("k1", "a.wav")).await;
        let mut rx = store.take_play_requests().await.unwrap();
        assert!(store.take_play_requests().await.is_none());

        store.play_track(0).await.unwrap();
        let request = rx.recv().await.unwrap();
        assert_eq!(request.index, 0);
        assert_eq!(request.track.key, "k1");

        assert!(store.play_track(5).await.is_err());
    }

    #[tokio::test]
    async fn test_changes_bump_revision() {
        let store = TrackStore::new();
        let rx = store.changes();
        store.add(track("k1", "a.wav")).await;
        assert_eq!(*rx.borrow(), 1);
        store.patch_by_key("missing", |_| {}).await;
        assert_eq!(*rx.borrow(), 1);
    }
}
