//! Track store play requests driving the engine

use sono_common::config::PlaybackConfig;
use sono_common::events::{EventBus, SonoEvent};
use sono_common::{AudioTrack, MediaSource, PlaylistController, TrackId, TrackStore};
use sono_player::{PlaybackEngine, PlayerSession};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

fn wav_track(name: &str, frames: usize) -> AudioTrack {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames * 2 {
            writer.write_sample((i % 32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    AudioTrack::placeholder(format!("key-{}", name), MediaSource::new(name, "audio/wav", cursor.into_inner()))
}

async fn wait_until_playing(engine: &PlaybackEngine, track_id: TrackId) {
    for _ in 0..300 {
        let state = engine.state().await;
        if state.is_playing() && state.track_id == Some(track_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("track {} never started", track_id);
}

// Real clock: decodes run on the blocking pool
#[tokio::test]
async fn test_session_plays_requests_and_advances() {
    let tracks = Arc::new(TrackStore::new());
    let first = wav_track("one.wav", 1_600);
    let second = wav_track("two.wav", 8_000);
    tracks.add(first.clone()).await;
    tracks.add(second.clone()).await;

    let engine = PlaybackEngine::with_null_output(PlaybackConfig::default(), tracks.clone(), EventBus::new(64));
    let session = PlayerSession::attach(engine.clone(), &tracks).await.unwrap();

    tracks.play_track(0).await.unwrap();
    wait_until_playing(&engine, first.id).await;

    // 0.2 s in, the engine asks the store for index 1
    wait_until_playing(&engine, second.id).await;
    assert_eq!(tracks.current_index().await, Some(1));

    engine.stop().await.unwrap();
    session.detach();
}

fn broken_track(name: &str) -> AudioTrack {
    AudioTrack::placeholder(format!("key-{}", name), MediaSource::new(name, "audio/mpeg", vec![1u8, 2, 3]))
}

#[tokio::test]
async fn test_session_skips_track_that_fails_to_load() {
    let tracks = Arc::new(TrackStore::new());
    let broken = broken_track("broken.mp3");
    let good = wav_track("good.wav", 8_000);
    tracks.add(broken.clone()).await;
    tracks.add(good.clone()).await;

    let engine = PlaybackEngine::with_null_output(PlaybackConfig::default(), tracks.clone(), EventBus::new(64));
    let session = PlayerSession::attach(engine.clone(), &tracks).await.unwrap();

    tracks.play_track(0).await.unwrap();
    wait_until_playing(&engine, good.id).await;
    assert_eq!(tracks.current_index().await, Some(1));

    engine.stop().await.unwrap();
    session.detach();
}

#[tokio::test]
async fn test_failed_last_track_ends_playlist() {
    let tracks = Arc::new(TrackStore::new());
    let broken = broken_track("broken.mp3");
    tracks.add(broken.clone()).await;

    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let engine = PlaybackEngine::with_null_output(PlaybackConfig::default(), tracks.clone(), events);
    let _session = PlayerSession::attach(engine.clone(), &tracks).await.unwrap();

    tracks.play_track(0).await.unwrap();
    let ended = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(SonoEvent::TrackEnded { track_id, has_next, .. }) = rx.recv().await {
                return (track_id, has_next);
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(ended, (broken.id, false));
    assert!(engine.state().await.is_stopped());
}

#[tokio::test]
async fn test_only_one_session_per_store() {
    let tracks = Arc::new(TrackStore::new());
    let engine = PlaybackEngine::with_null_output(PlaybackConfig::default(), tracks.clone(), EventBus::new(8));

    let _session = PlayerSession::attach(engine.clone(), &tracks).await.unwrap();
    let err = PlayerSession::attach(engine, &tracks).await.err().unwrap();
    assert_eq!(err.name(), "InvalidStateError");
}
