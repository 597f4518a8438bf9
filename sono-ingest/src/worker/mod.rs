//! Background verification worker
//!
//! Reconciles optimistic placeholder tracks with authoritative metadata.
//! Each task is resolved from the cache when possible, otherwise by metadata
//! extraction plus artwork resolution; the result is written to the cache and
//! patched into every live track with the same content key.
//!
//! # Lifecycle
//!
//! `Stopped → Running → (Paused ↔ Running) → Stopped`
//!
//! The batch loop takes up to `batch_size` ready tasks, processes them
//! concurrently, then sleeps `batch_delay`. Failed tasks are re-queued with
//! an exponential backoff deadline, so stopping the loop also halts retries.

mod queue;
mod stats;

pub use queue::VerificationTask;
pub use stats::WorkerStats;

use crate::artwork::ArtworkResolver;
use crate::cache::{MetadataCache, StoreOutcome};
use crate::error::IngestError;
use crate::extract::MetadataExtractor;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use queue::TaskQueue;
use sono_common::config::WorkerConfig;
use sono_common::events::{EventBus, SonoEvent, WorkerState};
use sono_common::hashing::compute_digest;
use sono_common::{ArtworkSource, TrackMetadata, TrackStore};
use stats::{bump, StatsCounters};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default task priority
pub const DEFAULT_PRIORITY: u32 = 1;

/// Result of [`VerificationWorker::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// A task for the key was already queued or in flight; priority merged
    Merged,
    /// Queue full and the new task had the lowest priority
    Dropped,
}

struct Verified {
    metadata: TrackMetadata,
    artwork: Option<ArtworkSource>,
    from_cache: bool,
}

struct PendingState {
    queue: TaskQueue,
    /// Keys currently being processed, with their (merged) priority
    in_flight: HashMap<String, u32>,
}

struct WorkerInner {
    config: WorkerConfig,
    max_age: chrono::Duration,
    cache: Arc<MetadataCache>,
    extractor: Arc<dyn MetadataExtractor>,
    resolver: Arc<ArtworkResolver>,
    tracks: Arc<TrackStore>,
    events: EventBus,
    pending: Mutex<PendingState>,
    state: watch::Sender<WorkerState>,
    stats: StatsCounters,
    idle: Notify,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

pub struct VerificationWorker {
    inner: Arc<WorkerInner>,
    lifecycle: Mutex<Lifecycle>,
}

impl VerificationWorker {
    pub fn new(
        config: WorkerConfig,
        cache: Arc<MetadataCache>,
        extractor: Arc<dyn MetadataExtractor>,
        resolver: Arc<ArtworkResolver>,
        tracks: Arc<TrackStore>,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Stopped);
        let max_age = cache.config().max_age();
        let queue = TaskQueue::new(config.max_queue_len);

        Self {
            inner: Arc::new(WorkerInner {
                config,
                max_age,
                cache,
                extractor,
                resolver,
                tracks,
                events,
                pending: Mutex::new(PendingState {
                    queue,
                    in_flight: HashMap::new(),
                }),
                state,
                stats: StatsCounters::default(),
                idle: Notify::new(),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.inner.state.subscribe()
    }

    pub fn stats(&self) -> WorkerStats {
        self.inner.stats.snapshot()
    }

    pub async fn queue_len(&self) -> usize {
        self.inner.pending.lock().await.queue.len()
    }

    /// Hash `bytes` and enqueue a verification task
    pub async fn enqueue(
        &self,
        file_name: &str,
        bytes: Arc<[u8]>,
        priority: u32,
    ) -> Result<EnqueueOutcome, IngestError> {
        let key = compute_digest(bytes.clone()).await?;
        Ok(self.enqueue_task(VerificationTask::new(key, file_name, bytes, priority)).await)
    }

    /// Enqueue a task whose key is already known
    pub async fn enqueue_task(&self, task: VerificationTask) -> EnqueueOutcome {
        let key = task.key.clone();

        let dropped = {
            let mut pending = self.inner.pending.lock().await;

            if let Some(priority) = pending.in_flight.get_mut(&key) {
                *priority = (*priority).max(task.priority);
                bump(&self.inner.stats.deduplicated);
                debug!(key = %key, "Task already in flight, merged priority");
                return EnqueueOutcome::Merged;
            }

            if pending.queue.merge_priority(&key, task.priority) {
                bump(&self.inner.stats.deduplicated);
                debug!(key = %key, "Task already queued, merged priority");
                return EnqueueOutcome::Merged;
            }

            bump(&self.inner.stats.enqueued);
            pending.queue.push(task)
        };

        let outcome = if dropped.iter().any(|t| t.key == key) {
            EnqueueOutcome::Dropped
        } else {
            debug!(key = %key, "Verification task queued");
            EnqueueOutcome::Queued
        };

        self.inner.handle_dropped(dropped).await;
        outcome
    }

    /// Start (or resume) background processing
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;

        match self.state() {
            WorkerState::Running => return,
            WorkerState::Paused => {
                self.inner.set_state(WorkerState::Running);
                return;
            }
            WorkerState::Stopped => {}
        }

        lifecycle.handles.retain(|h| !h.is_finished());
        self.inner.set_state(WorkerState::Running);

        let cancel = CancellationToken::new();
        lifecycle
            .handles
            .push(tokio::spawn(run_loop(self.inner.clone(), cancel.clone())));
        lifecycle
            .handles
            .push(tokio::spawn(run_cleanup(self.inner.clone(), cancel.clone())));
        lifecycle.cancel = Some(cancel);
    }

    /// Halt the batch loop and scheduled retries; in-flight tasks complete
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(cancel) = lifecycle.cancel.take() {
            cancel.cancel();
        }
        self.inner.set_state(WorkerState::Stopped);
    }

    pub fn pause(&self) {
        if self.state() == WorkerState::Running {
            self.inner.set_state(WorkerState::Paused);
        }
    }

    pub fn resume(&self) {
        if self.state() == WorkerState::Paused {
            self.inner.set_state(WorkerState::Running);
        }
    }

    /// Stop, abort background tasks and clear the queue
    pub async fn destroy(&self) {
        self.stop().await;

        let handles = std::mem::take(&mut self.lifecycle.lock().await.handles);
        for handle in handles {
            handle.abort();
        }

        {
            let mut pending = self.inner.pending.lock().await;
            pending.queue.clear();
            pending.in_flight.clear();
        }
        self.inner.idle.notify_waiters();
        info!("Verification worker destroyed");
    }

    /// Wait until no task is queued or in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            {
                let pending = self.inner.pending.lock().await;
                if pending.queue.len() == 0 && pending.in_flight.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}

impl Drop for VerificationWorker {
    fn drop(&mut self) {
        if let Ok(lifecycle) = self.lifecycle.try_lock() {
            if let Some(cancel) = &lifecycle.cancel {
                cancel.cancel();
            }
            for handle in &lifecycle.handles {
                handle.abort();
            }
        }
    }
}

impl WorkerInner {
    fn set_state(&self, new_state: WorkerState) {
        let old_state = self.state.send_replace(new_state);
        if old_state != new_state {
            info!(old = %old_state, new = %new_state, "Verification worker state changed");
            self.events.emit_lossy(SonoEvent::WorkerStateChanged {
                old_state,
                new_state,
                timestamp: Utc::now(),
            });
        }
    }

    /// Tracks whose task fell off the queue keep their placeholder metadata
    async fn handle_dropped(&self, dropped: Vec<VerificationTask>) {
        for task in dropped {
            bump(&self.stats.dropped);
            warn!(key = %task.key, priority = task.priority, "Verification queue full, task dropped");
            self.tracks
                .patch_by_key(&task.key, |track| track.is_loading = false)
                .await;
        }
    }

    async fn verify(&self, task: &VerificationTask) -> Result<Verified, IngestError> {
        match self.cache.lookup(&task.key).await {
            Ok(Some(entry)) => {
                bump(&self.stats.cache_hits);
                debug!(key = %task.key, "Verification cache hit");
                return Ok(Verified {
                    metadata: entry.metadata,
                    artwork: entry.artwork,
                    from_cache: true,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(key = %task.key, error = %e, "Cache lookup failed, extracting"),
        }

        let metadata = self
            .extractor
            .extract_metadata(task.bytes.clone(), &task.file_name)
            .await?;
        let resolution = self.resolver.resolve(&metadata, &task.bytes, &task.file_name).await;
        let artwork = resolution.best_artwork;

        match self.cache.store(&task.key, &metadata, artwork.as_ref()).await {
            Ok(StoreOutcome::Collision) => {
                bump(&self.stats.collisions);
                // First write wins: live tracks follow the cached entry
                if let Ok(Some(entry)) = self.cache.lookup(&task.key).await {
                    return Ok(Verified {
                        metadata: entry.metadata,
                        artwork: entry.artwork,
                        from_cache: true,
                    });
                }
            }
            Ok(_) => {}
            Err(e) => warn!(key = %task.key, error = %e, "Cache write failed"),
        }

        Ok(Verified {
            metadata,
            artwork,
            from_cache: false,
        })
    }

    async fn process_task(&self, mut task: VerificationTask) {
        bump(&self.stats.processed);
        let key = task.key.clone();

        match self.verify(&task).await {
            Ok(verified) => {
                let patched = self
                    .tracks
                    .patch_by_key(&key, |track| {
                        track.metadata = verified.metadata.clone();
                        track.artwork = verified.artwork.clone();
                        track.is_loading = false;
                    })
                    .await;

                bump(&self.stats.succeeded);
                info!(key = %key, tracks = patched, from_cache = verified.from_cache, "Track verified");
                self.events.emit_lossy(SonoEvent::TrackVerified {
                    key: key.clone(),
                    tracks_patched: patched,
                    from_cache: verified.from_cache,
                    timestamp: Utc::now(),
                });
                self.finish(&key).await;
            }
            Err(e) if task.retry_count < self.config.max_retries => {
                let delay = self.config.retry_backoff(task.retry_count);
                task.retry_count += 1;
                task.not_before = Some(Instant::now() + delay);
                bump(&self.stats.retries);
                warn!(
                    key = %key,
                    attempt = task.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Verification failed, retrying"
                );

                let dropped = {
                    let mut pending = self.pending.lock().await;
                    if let Some(priority) = pending.in_flight.remove(&key) {
                        task.priority = task.priority.max(priority);
                    }
                    pending.queue.push(task)
                };
                self.handle_dropped(dropped).await;
                self.idle.notify_waiters();
            }
            Err(e) => {
                let attempts = task.retry_count + 1;
                bump(&self.stats.failed);
                error!(key = %key, attempts, error = %e, "Verification failed permanently");

                self.tracks
                    .patch_by_key(&key, |track| track.is_loading = false)
                    .await;
                self.events.emit_lossy(SonoEvent::TrackVerificationFailed {
                    key: key.clone(),
                    attempts,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                self.finish(&key).await;
            }
        }
    }

    async fn finish(&self, key: &str) {
        self.pending.lock().await.in_flight.remove(key);
        self.idle.notify_waiters();
    }
}

async fn run_loop(inner: Arc<WorkerInner>, cancel: CancellationToken) {
    let mut state_rx = inner.state.subscribe();
    let batch_size = inner.config.batch_size.max(1);
    info!(batch_size, "Verification loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if *state_rx.borrow_and_update() == WorkerState::Paused {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        let batch = {
            let mut pending = inner.pending.lock().await;
            let batch = pending.queue.take_ready(Instant::now(), batch_size);
            for task in &batch {
                pending.in_flight.insert(task.key.clone(), task.priority);
            }
            batch
        };

        if !batch.is_empty() {
            debug!(count = batch.len(), "Processing verification batch");
            // Not raced against cancellation: in-flight tasks always complete
            stream::iter(batch)
                .map(|task| {
                    let inner = inner.clone();
                    async move { inner.process_task(task).await }
                })
                .buffer_unordered(batch_size)
                .collect::<Vec<()>>()
                .await;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.config.batch_delay()) => {}
        }
    }

    info!("Verification loop stopped");
}

async fn run_cleanup(inner: Arc<WorkerInner>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.config.cleanup_interval()) => {}
        }

        match inner.cache.expire_older_than(inner.max_age).await {
            Ok(0) => debug!("Cache cleanup: nothing expired"),
            Ok(count) => info!(count, "Cache cleanup expired entries"),
            Err(e) => warn!(error = %e, "Cache cleanup failed"),
        }
    }
}
