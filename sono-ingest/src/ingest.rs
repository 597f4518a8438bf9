//! Audio file ingestion
//!
//! `load_audio_file` validates, hashes and publishes a track immediately:
//! a cache hit yields a fully resolved track, a miss yields a placeholder
//! (`is_loading = true`) plus a verification task for the worker.

use crate::artwork::ArtworkResolver;
use crate::cache::{MetadataCache, MetadataStore, SqliteStore};
use crate::error::IngestError;
use crate::extract::{MetadataExtractor, TagExtractor};
use crate::worker::{VerificationTask, VerificationWorker, DEFAULT_PRIORITY};
use chrono::Utc;
use sono_common::config::SonoConfig;
use sono_common::events::{EventBus, SonoEvent};
use sono_common::hashing::{compute_digest, resolve_mime, validate_file_type};
use sono_common::{AudioTrack, MediaSource, TrackId, TrackStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Ingestor {
    cache: Arc<MetadataCache>,
    worker: Arc<VerificationWorker>,
    tracks: Arc<TrackStore>,
    events: EventBus,
}

impl Ingestor {
    pub fn new(
        cache: Arc<MetadataCache>,
        worker: Arc<VerificationWorker>,
        tracks: Arc<TrackStore>,
        events: EventBus,
    ) -> Self {
        Self {
            cache,
            worker,
            tracks,
            events,
        }
    }

    /// Wire the full ingestion stack from configuration
    ///
    /// The cache uses SQLite under `root_folder` when `cache.database_file` is
    /// set, otherwise memory. Metadata comes from [`TagExtractor`]; artwork
    /// lookups use the public web services.
    pub async fn from_config(
        config: &SonoConfig,
        root_folder: &Path,
        tracks: Arc<TrackStore>,
        events: EventBus,
    ) -> Result<Self, IngestError> {
        let store: Arc<dyn MetadataStore> = match &config.cache.database_file {
            Some(file) => Arc::new(SqliteStore::open(&root_folder.join(file), config.cache.quota_bytes).await?),
            None => Arc::new(crate::cache::MemoryStore::new(config.cache.quota_bytes)),
        };
        let cache = Arc::new(MetadataCache::new(store, config.cache.clone(), events.clone()));

        let extractor: Arc<dyn MetadataExtractor> = Arc::new(TagExtractor::new());
        let resolver = Arc::new(ArtworkResolver::from_config(config.artwork.clone(), &config.services)?);

        let worker = Arc::new(VerificationWorker::new(
            config.worker.clone(),
            cache.clone(),
            extractor,
            resolver,
            tracks.clone(),
            events.clone(),
        ));

        Ok(Self::new(cache, worker, tracks, events))
    }

    pub fn worker(&self) -> &Arc<VerificationWorker> {
        &self.worker
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn tracks(&self) -> &Arc<TrackStore> {
        &self.tracks
    }

    /// Ingest one file with default priority
    pub async fn load_audio_file(
        &self,
        file_name: &str,
        bytes: impl Into<Arc<[u8]>>,
        mime_type: Option<&str>,
    ) -> Result<AudioTrack, IngestError> {
        self.load_audio_file_with_priority(file_name, bytes, mime_type, DEFAULT_PRIORITY)
            .await
    }

    /// Ingest one file; returns the track as published (placeholder or
    /// resolved from cache)
    pub async fn load_audio_file_with_priority(
        &self,
        file_name: &str,
        bytes: impl Into<Arc<[u8]>>,
        mime_type: Option<&str>,
        priority: u32,
    ) -> Result<AudioTrack, IngestError> {
        let bytes: Arc<[u8]> = bytes.into();
        let mime = resolve_mime(file_name, mime_type, &bytes);
        validate_file_type(file_name, &mime, bytes.len())?;

        let key = compute_digest(bytes.clone()).await?;
        let source = MediaSource::new(file_name, mime, bytes.clone());

        let cached = match self.cache.lookup(&key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, publishing placeholder");
                None
            }
        };

        let track = match cached {
            Some(entry) => {
                debug!(key = %key, file = %file_name, "Cache hit at ingestion");
                AudioTrack::resolved(key.clone(), source, entry.metadata, entry.artwork)
            }
            None => AudioTrack::placeholder(key.clone(), source),
        };

        self.tracks.add(track.clone()).await;
        info!(
            track_id = %track.id,
            key = %key,
            file = %file_name,
            is_loading = track.is_loading,
            "Track added"
        );
        self.events.emit_lossy(SonoEvent::TrackAdded {
            track_id: track.id,
            key: key.clone(),
            is_loading: track.is_loading,
            timestamp: Utc::now(),
        });

        if track.is_loading {
            self.worker
                .enqueue_task(VerificationTask::new(key, file_name, bytes, priority))
                .await;
        }

        Ok(track)
    }

    /// Remove a track from the playlist; its source buffer is released with
    /// the last handle
    pub async fn remove_track(&self, id: TrackId) -> Result<AudioTrack, IngestError> {
        let track = self
            .tracks
            .remove(id)
            .await
            .ok_or(IngestError::TrackNotFound(id))?;

        info!(track_id = %id, "Track removed");
        self.events.emit_lossy(SonoEvent::TrackRemoved {
            track_id: id,
            timestamp: Utc::now(),
        });
        Ok(track)
    }
}
