//! Playback engine
//!
//! Owns the single [`AudioContext`] (created on first load) and the transport
//! state machine:
//!
//! ```text
//! Idle -> Loading -> Ready -> Playing <-> Paused
//!                              any -> Stopped (stop / natural end)
//! ```
//!
//! Loads are last-writer-wins: every `load()` cancels the previous token and
//! bumps a generation counter, and a load only touches shared state while its
//! generation is still current.

use crate::audio::{AudioContext, AudioOutput, DecodedAudio, NullOutput, OutputFactory, PlaybackNode};
use crate::error::{PlaybackError, Result};
use crate::playback::state::{EngineStatus, PlaybackState};
use crate::playback::throttle::Throttle;
use chrono::Utc;
use sono_common::config::PlaybackConfig;
use sono_common::events::{EventBus, SonoEvent, Transport};
use sono_common::{AudioTrack, PlaylistController, TrackId};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cheap to clone; clones drive the same engine
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: PlaybackConfig,
    output_factory: OutputFactory,
    context: OnceCell<Arc<AudioContext>>,
    playlist: Arc<dyn PlaylistController>,
    events: EventBus,
    state_tx: broadcast::Sender<PlaybackState>,
    core: Mutex<EngineCore>,
    load_generation: AtomicU64,
    /// Token of the newest load; guards `load_generation` bumps too
    load_cancel: std::sync::Mutex<CancellationToken>,
}

struct EngineCore {
    status: EngineStatus,
    /// Generation of the load that last took over this state
    generation: u64,
    transport: Transport,
    track_id: Option<TrackId>,
    audio: Option<Arc<DecodedAudio>>,
    node: Option<Box<dyn PlaybackNode>>,
    /// Bumped whenever `node` is replaced or torn down
    node_seq: u64,
    /// Where the next play starts when no `at` is given
    position: f64,
    current_time: f64,
    duration: f64,
    volume: f32,
    muted: bool,
    throttle: Throttle,
    ticker: Option<JoinHandle<()>>,
}

impl EngineCore {
    fn gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    fn snapshot(&self) -> PlaybackState {
        PlaybackState {
            transport: self.transport,
            current_time: self.current_time,
            duration: self.duration,
            volume: self.volume,
            is_muted: self.muted,
            track_id: self.track_id,
        }
    }

    /// Stop and drop the active node, returning its last position
    fn teardown_node(&mut self) -> Option<f64> {
        let node = self.node.take()?;
        self.node_seq += 1;
        let position = node.position();
        node.stop();
        Some(position)
    }

    fn install_node(&mut self, node: Box<dyn PlaybackNode>) {
        self.teardown_node();
        self.node_seq += 1;
        self.node = Some(node);
    }

    fn stop_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

impl Drop for EngineCore {
    fn drop(&mut self) {
        self.teardown_node();
        self.stop_ticker();
    }
}

impl PlaybackEngine {
    pub fn new(
        config: PlaybackConfig,
        output_factory: OutputFactory,
        playlist: Arc<dyn PlaylistController>,
        events: EventBus,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(config.state_channel_capacity.max(1));
        let volume = clamp_unit(config.initial_volume);
        let throttle = Throttle::new(config.publish_interval());

        Self {
            inner: Arc::new(EngineInner {
                config,
                output_factory,
                context: OnceCell::new(),
                playlist,
                events,
                state_tx,
                core: Mutex::new(EngineCore {
                    status: EngineStatus::Idle,
                    generation: 0,
                    transport: Transport::Stopped,
                    track_id: None,
                    audio: None,
                    node: None,
                    node_seq: 0,
                    position: 0.0,
                    current_time: 0.0,
                    duration: 0.0,
                    volume,
                    muted: false,
                    throttle,
                    ticker: None,
                }),
                load_generation: AtomicU64::new(0),
                load_cancel: std::sync::Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Engine rendering to a [`NullOutput`]
    pub fn with_null_output(
        config: PlaybackConfig,
        playlist: Arc<dyn PlaylistController>,
        events: EventBus,
    ) -> Self {
        let factory: OutputFactory = Arc::new(|| -> Result<Arc<dyn AudioOutput>> {
            let output: Arc<dyn AudioOutput> = Arc::new(NullOutput::new());
            Ok(output)
        });
        Self::new(config, factory, playlist, events)
    }

    /// Engine rendering to the default audio device
    #[cfg(feature = "cpal-output")]
    pub fn with_device_output(
        config: PlaybackConfig,
        playlist: Arc<dyn PlaylistController>,
        events: EventBus,
    ) -> Self {
        let factory: OutputFactory = Arc::new(|| -> Result<Arc<dyn AudioOutput>> {
            let output: Arc<dyn AudioOutput> = Arc::new(crate::audio::CpalOutput::open()?);
            Ok(output)
        });
        Self::new(config, factory, playlist, events)
    }

    /// Whether the shared audio context has been created yet
    pub fn has_context(&self) -> bool {
        self.inner.context.initialized()
    }

    pub async fn status(&self) -> EngineStatus {
        self.inner.core.lock().await.status
    }

    /// Current snapshot, independent of the throttle
    pub async fn state(&self) -> PlaybackState {
        self.inner.core.lock().await.snapshot()
    }

    /// Raw state stream; lagging receivers skip to the newest snapshots
    pub fn state_receiver(&self) -> broadcast::Receiver<PlaybackState> {
        self.inner.state_tx.subscribe()
    }

    /// Call `listener` for every published snapshot until the returned
    /// subscription is dropped or unsubscribed
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(PlaybackState) + Send + Sync + 'static,
    {
        let mut rx = self.inner.state_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(state) => listener(state),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Playback listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { handle: Some(handle) }
    }

    /// Decode `track` against the shared context
    ///
    /// Cancels any in-flight load immediately, before the returned future is
    /// polled. A superseded load resolves to [`PlaybackError::Aborted`] and
    /// leaves engine state alone.
    pub fn load(&self, track: &AudioTrack) -> impl Future<Output = Result<Arc<DecodedAudio>>> + Send + 'static {
        let token = CancellationToken::new();
        let generation = {
            let mut current = self.inner.load_cancel.lock().unwrap_or_else(|e| e.into_inner());
            current.cancel();
            *current = token.clone();
            self.inner.load_generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let inner = Arc::clone(&self.inner);
        let track_id = track.id;
        let bytes = track.source.bytes.clone();
        let extension = track.source.extension();
        async move { inner.run_load(generation, token, track_id, bytes, extension).await }
    }

    /// Start playback at `at` seconds, or from the last position
    pub async fn play(&self, at: Option<f64>) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        self.inner.start_locked(&mut core, at)
    }

    /// Play the loaded track only if it is still `track_id`; returns whether
    /// playback started
    pub async fn play_loaded(&self, track_id: TrackId) -> Result<bool> {
        let mut core = self.inner.core.lock().await;
        if core.track_id != Some(track_id) || core.audio.is_none() {
            return Ok(false);
        }
        self.inner.start_locked(&mut core, None)?;
        Ok(true)
    }

    pub async fn pause(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        match core.transport {
            Transport::Paused => Ok(()),
            Transport::Stopped => Err(PlaybackError::InvalidState("Cannot pause while stopped".to_string())),
            Transport::Playing => {
                core.stop_ticker();
                let position = core.teardown_node().unwrap_or(core.current_time).min(core.duration);
                core.position = position;
                core.current_time = position;
                core.status = EngineStatus::Paused;
                self.inner.set_transport(&mut core, Transport::Paused);
                core.throttle.reset(Instant::now());
                self.inner.publish(&core);
                Ok(())
            }
        }
    }

    pub async fn resume(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        match core.transport {
            Transport::Playing => Ok(()),
            Transport::Stopped => Err(PlaybackError::InvalidState("Nothing paused to resume".to_string())),
            Transport::Paused => {
                let position = core.position;
                self.inner.start_locked(&mut core, Some(position))
            }
        }
    }

    /// Stop playback; position returns to 0 and the active node is torn down
    pub async fn stop(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        core.stop_ticker();
        core.teardown_node();
        core.position = 0.0;
        core.current_time = 0.0;
        core.status = EngineStatus::Stopped;
        self.inner.set_transport(&mut core, Transport::Stopped);
        self.inner.publish(&core);
        Ok(())
    }

    /// Jump to `time` seconds, clamped to the track
    pub async fn seek(&self, time: f64) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        let audio = core.audio.clone().ok_or(PlaybackError::NotLoaded)?;
        let target = clamp_time(time, audio.duration);

        if core.transport == Transport::Playing {
            let context = self.inner.context.get().cloned().ok_or(PlaybackError::NotLoaded)?;
            context.ensure_running()?;
            let node = context.output().start(audio, target, core.gain())?;
            core.install_node(node);
        }

        core.position = target;
        core.current_time = target;
        core.throttle.reset(Instant::now());
        self.inner.publish(&core);
        debug!(time = target, "Seek");
        Ok(())
    }

    /// Set volume, clamped to [0, 1]
    pub async fn set_volume(&self, volume: f32) {
        let mut core = self.inner.core.lock().await;
        core.volume = clamp_unit(volume);
        let gain = core.gain();
        if let Some(node) = core.node.as_ref() {
            node.set_gain(gain);
        }
        self.inner.publish(&core);
    }

    pub async fn set_muted(&self, muted: bool) {
        let mut core = self.inner.core.lock().await;
        core.muted = muted;
        let gain = core.gain();
        if let Some(node) = core.node.as_ref() {
            node.set_gain(gain);
        }
        self.inner.publish(&core);
    }

    /// Natural end of the current track
    ///
    /// Requests the next playlist entry if there is one; otherwise the engine
    /// stays stopped at 0.
    pub async fn handle_ended(&self) {
        self.inner.finish_track(TrackEnd::Ended).await;
    }

    /// Move past `track_id` after its load failed, as if it had ended
    ///
    /// Does nothing and returns `false` once another load has taken over.
    pub async fn skip_failed_load(&self, track_id: TrackId) -> bool {
        self.inner.finish_track(TrackEnd::LoadFailed(track_id)).await
    }
}

impl EngineInner {
    fn publish(&self, core: &EngineCore) {
        // No receivers is fine
        let _ = self.state_tx.send(core.snapshot());
    }

    fn set_transport(&self, core: &mut EngineCore, transport: Transport) {
        if core.transport == transport {
            return;
        }
        let old_state = core.transport;
        core.transport = transport;
        info!(old_state = %old_state, new_state = %transport, "Playback state changed");
        self.events.emit_lossy(SonoEvent::PlaybackStateChanged {
            old_state,
            new_state: transport,
            track_id: core.track_id,
            timestamp: Utc::now(),
        });
    }

    fn is_current_load(&self, generation: u64) -> bool {
        self.load_generation.load(Ordering::SeqCst) == generation
    }

    async fn context(&self) -> Result<Arc<AudioContext>> {
        self.context
            .get_or_try_init(|| async {
                let output = (self.output_factory)()?;
                info!("Audio context created");
                Ok::<_, PlaybackError>(Arc::new(AudioContext::new(output)))
            })
            .await
            .cloned()
    }

    async fn run_load(
        self: Arc<Self>,
        generation: u64,
        token: CancellationToken,
        track_id: TrackId,
        bytes: Arc<[u8]>,
        extension: Option<String>,
    ) -> Result<Arc<DecodedAudio>> {
        {
            let mut core = self.core.lock().await;
            if !self.is_current_load(generation) {
                return Err(PlaybackError::Aborted);
            }
            core.stop_ticker();
            core.teardown_node();
            core.generation = generation;
            core.audio = None;
            core.track_id = Some(track_id);
            core.duration = 0.0;
            core.position = 0.0;
            core.current_time = 0.0;
            core.status = EngineStatus::Loading;
            self.set_transport(&mut core, Transport::Stopped);
            self.publish(&core);
        }
        debug!(track_id = %track_id, generation, "Loading track");

        // Context failures settle through the same guard as decode failures
        let decoded = match self.context().await.and_then(|c| c.ensure_running().map(|_| c)) {
            Ok(context) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(PlaybackError::Aborted),
                    result = context.decode(bytes, extension, token.clone()) => result,
                }
            }
            Err(e) => Err(e),
        };

        let mut core = self.core.lock().await;
        if token.is_cancelled() || !self.is_current_load(generation) {
            debug!(track_id = %track_id, generation, "Discarding superseded load");
            return Err(PlaybackError::Aborted);
        }

        match decoded {
            Ok(audio) => {
                core.audio = Some(Arc::clone(&audio));
                core.duration = audio.duration;
                core.status = EngineStatus::Ready;
                self.publish(&core);
                info!(
                    track_id = %track_id,
                    duration = audio.duration,
                    sample_rate = audio.sample_rate,
                    channels = audio.channels,
                    "Track loaded"
                );
                Ok(audio)
            }
            Err(e) => {
                warn!(track_id = %track_id, error = %e, "Track failed to load");
                core.status = EngineStatus::Idle;
                self.publish(&core);
                Err(e)
            }
        }
    }

    /// Start a node for the loaded audio; caller holds the core lock
    fn start_locked(self: &Arc<Self>, core: &mut EngineCore, at: Option<f64>) -> Result<()> {
        let audio = core.audio.clone().ok_or(PlaybackError::NotLoaded)?;
        // A load has completed, so the context exists
        let context = self.context.get().cloned().ok_or(PlaybackError::NotLoaded)?;
        context.ensure_running()?;

        let offset = match at {
            Some(time) => clamp_time(time, audio.duration),
            // Replay from the top after running off the end
            None if core.position >= audio.duration => 0.0,
            None => core.position,
        };

        core.stop_ticker();
        core.teardown_node();
        let node = context.output().start(audio, offset, core.gain())?;
        core.install_node(node);
        core.position = offset;
        core.current_time = offset;
        core.status = EngineStatus::Playing;
        self.set_transport(core, Transport::Playing);
        core.throttle.reset(Instant::now());
        self.publish(core);

        core.ticker = Some(tokio::spawn(run_ticker(
            Arc::downgrade(self),
            self.config.tick_interval(),
        )));
        Ok(())
    }

    /// End the current track and advance the playlist
    ///
    /// Returns `false` without touching state when `end` no longer refers to
    /// the current track.
    async fn finish_track(&self, end: TrackEnd) -> bool {
        let track_id = {
            let mut core = self.core.lock().await;
            match end {
                TrackEnd::Ended => core.stop_ticker(),
                TrackEnd::NodeFinished(seq) => {
                    if seq != core.node_seq || core.node.is_none() {
                        debug!(seq, current = core.node_seq, "Ignoring end of a replaced node");
                        return false;
                    }
                    // Called from the ticker itself; it exits on its own
                    core.ticker = None;
                }
                TrackEnd::LoadFailed(track_id) => {
                    let superseded = core.generation != self.load_generation.load(Ordering::SeqCst);
                    if superseded || core.track_id != Some(track_id) || core.status != EngineStatus::Idle {
                        return false;
                    }
                }
            }
            core.teardown_node();
            core.position = 0.0;
            core.current_time = 0.0;
            core.status = EngineStatus::Stopped;
            self.set_transport(&mut core, Transport::Stopped);
            self.publish(&core);
            core.track_id
        };

        let next = match self.playlist.current_index().await {
            Some(index) if index + 1 < self.playlist.len().await => Some(index + 1),
            _ => None,
        };

        if let Some(track_id) = track_id {
            info!(track_id = %track_id, has_next = next.is_some(), "Track ended");
            self.events.emit_lossy(SonoEvent::TrackEnded {
                track_id,
                has_next: next.is_some(),
                timestamp: Utc::now(),
            });
        }

        if let Some(index) = next {
            if let Err(e) = self.playlist.play_track(index).await {
                warn!(index, error = %e, "Failed to request next track");
            }
        }
        true
    }
}

enum TrackEnd {
    /// Reported from outside, e.g. by the output
    Ended,
    /// The ticker saw the node with this sequence number run out
    NodeFinished(u64),
    LoadFailed(TrackId),
}

async fn run_ticker(engine: Weak<EngineInner>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(inner) = engine.upgrade() else {
            break;
        };

        let finished_node = {
            let mut core = inner.core.lock().await;
            if core.transport != Transport::Playing {
                break;
            }
            let Some((position, finished)) = core.node.as_ref().map(|n| (n.position(), n.is_finished())) else {
                break;
            };
            core.current_time = position.min(core.duration);
            if !finished && core.throttle.should_publish(Instant::now()) {
                inner.publish(&core);
            }
            finished.then_some(core.node_seq)
        };

        if let Some(seq) = finished_node {
            if inner.finish_track(TrackEnd::NodeFinished(seq)).await {
                break;
            }
        }
    }
}

fn clamp_time(time: f64, duration: f64) -> f64 {
    if time.is_nan() {
        0.0
    } else {
        time.clamp(0.0, duration.max(0.0))
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Listener registration from [`PlaybackEngine::subscribe`]
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
