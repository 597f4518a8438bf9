//! End-to-end ingestion: validation, placeholder publication, verification
//! and cache reuse

use async_trait::async_trait;
use sono_common::config::{ArtworkSettings, CacheConfig, WorkerConfig};
use sono_common::events::{EventBus, SonoEvent};
use sono_common::{ArtworkKind, TrackMetadata, TrackStore};
use sono_ingest::cache::SqliteStore;
use sono_ingest::{
    ArtworkResolver, ExtractionError, IngestError, Ingestor, MetadataCache, MetadataExtractor,
    VerificationWorker,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts calls and returns fixed tags
struct CountingExtractor {
    calls: AtomicUsize,
}

impl CountingExtractor {
    fn new() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataExtractor for CountingExtractor {
    async fn extract_metadata(&self, _bytes: Arc<[u8]>, _file_name: &str) -> Result<TrackMetadata, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TrackMetadata {
            title: "Tagged Title".to_string(),
            artist: "Tagged Artist".to_string(),
            album: "Tagged Album".to_string(),
            duration: 3.0,
            sample_rate: 44_100,
            channels: 2,
            bit_depth: 16,
            artwork: None,
        })
    }
}

struct Harness {
    ingestor: Ingestor,
    extractor: Arc<CountingExtractor>,
    tracks: Arc<TrackStore>,
    events: EventBus,
}

fn harness_with_cache(cache: Arc<MetadataCache>, events: EventBus) -> Harness {
    let tracks = Arc::new(TrackStore::new());
    let extractor = CountingExtractor::new();
    let worker = Arc::new(VerificationWorker::new(
        WorkerConfig::default(),
        cache.clone(),
        extractor.clone(),
        Arc::new(ArtworkResolver::new(ArtworkSettings::offline())),
        tracks.clone(),
        events.clone(),
    ));

    Harness {
        ingestor: Ingestor::new(cache, worker, tracks.clone(), events.clone()),
        extractor,
        tracks,
        events,
    }
}

fn harness() -> Harness {
    let events = EventBus::new(64);
    let cache = Arc::new(MetadataCache::in_memory(CacheConfig::default(), events.clone()));
    harness_with_cache(cache, events)
}

#[tokio::test]
async fn test_placeholder_is_published_before_verification() {
    let h = harness();
    let track = h
        .ingestor
        .load_audio_file("Some Artist - Some Song.mp3", vec![1u8, 2, 3], None)
        .await
        .unwrap();

    assert!(track.is_loading);
    assert_eq!(track.metadata.title, "Some Artist - Some Song");
    assert_eq!(track.source.mime_type, "audio/mpeg");
    assert_eq!(h.tracks.len().await, 1);
    assert_eq!(h.ingestor.worker().queue_len().await, 1);
    assert_eq!(h.extractor.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_identical_bytes_are_extracted_once() {
    let h = harness();
    h.ingestor.worker().start().await;

    let first = h.ingestor.load_audio_file("a.mp3", vec![7u8, 8, 9], None).await.unwrap();
    h.ingestor.worker().wait_idle().await;

    let first = h.tracks.get(first.id).await.unwrap();
    assert!(!first.is_loading);
    assert_eq!(first.metadata.artist, "Tagged Artist");
    assert_eq!(first.artwork.as_ref().unwrap().kind, ArtworkKind::Placeholder);

    // Second ingest: resolved straight from cache, no extraction, no task
    let second = h.ingestor.load_audio_file("copy.mp3", vec![7u8, 8, 9], None).await.unwrap();
    assert!(!second.is_loading);
    assert_eq!(second.metadata, first.metadata);
    assert_eq!(second.artwork, first.artwork);
    assert_eq!(h.extractor.calls(), 1);
    assert_eq!(h.ingestor.worker().queue_len().await, 0);

    h.ingestor.worker().destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_before_verification_patches_both_tracks() {
    let h = harness();
    let a = h.ingestor.load_audio_file("a.wav", vec![1u8, 1, 1], None).await.unwrap();
    let b = h.ingestor.load_audio_file("b.wav", vec![1u8, 1, 1], None).await.unwrap();
    assert_eq!(a.key, b.key);
    assert_eq!(h.ingestor.worker().queue_len().await, 1);

    h.ingestor.worker().start().await;
    h.ingestor.worker().wait_idle().await;

    for id in [a.id, b.id] {
        let track = h.tracks.get(id).await.unwrap();
        assert!(!track.is_loading);
        assert_eq!(track.metadata.title, "Tagged Title");
    }
    assert_eq!(h.extractor.calls(), 1);
    assert_eq!(h.ingestor.worker().stats().deduplicated, 1);

    h.ingestor.worker().destroy().await;
}

#[tokio::test]
async fn test_unsupported_file_is_rejected_before_publication() {
    let h = harness();
    let err = h
        .ingestor
        .load_audio_file("notes.txt", b"hello".to_vec(), Some("text/plain"))
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(h.tracks.is_empty().await);

    let err = h.ingestor.load_audio_file("empty.mp3", Vec::new(), None).await.unwrap_err();
    assert!(matches!(err, IngestError::Validation(_)));
}

#[tokio::test]
async fn test_remove_track_emits_event() {
    let h = harness();
    let mut rx = h.events.subscribe();
    let track = h.ingestor.load_audio_file("a.mp3", vec![1u8], None).await.unwrap();
    assert!(matches!(rx.recv().await.unwrap(), SonoEvent::TrackAdded { .. }));

    let removed = h.ingestor.remove_track(track.id).await.unwrap();
    assert_eq!(removed.id, track.id);
    assert!(h.tracks.is_empty().await);
    match rx.recv().await.unwrap() {
        SonoEvent::TrackRemoved { track_id, .. } => assert_eq!(track_id, track.id),
        other => panic!("unexpected event: {:?}", other),
    }

    assert!(matches!(
        h.ingestor.remove_track(track.id).await,
        Err(IngestError::TrackNotFound(_))
    ));
}

// Real clock: sqlx pool timeouts must not auto-advance
#[tokio::test]
async fn test_sqlite_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("cache.db");
    let events = EventBus::new(64);

    {
        let store = Arc::new(SqliteStore::open(&db_path, usize::MAX).await.unwrap());
        let cache = Arc::new(MetadataCache::new(store, CacheConfig::default(), events.clone()));
        let h = harness_with_cache(cache, events.clone());
        h.ingestor.load_audio_file("a.flac", vec![4u8, 5, 6], None).await.unwrap();
        h.ingestor.worker().start().await;
        h.ingestor.worker().wait_idle().await;
        h.ingestor.worker().destroy().await;
        assert_eq!(h.extractor.calls(), 1);
    }

    let store = Arc::new(SqliteStore::open(&db_path, usize::MAX).await.unwrap());
    let cache = Arc::new(MetadataCache::new(store, CacheConfig::default(), events.clone()));
    let h = harness_with_cache(cache, events);

    let track = h.ingestor.load_audio_file("again.flac", vec![4u8, 5, 6], None).await.unwrap();
    assert!(!track.is_loading);
    assert_eq!(track.metadata.album, "Tagged Album");
    assert_eq!(h.extractor.calls(), 0);
}
