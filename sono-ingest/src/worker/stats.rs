//! Worker counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot returned by `VerificationWorker::stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub enqueued: u64,
    pub deduplicated: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub dropped: u64,
    pub collisions: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub enqueued: AtomicU64,
    pub deduplicated: AtomicU64,
    pub processed: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub retries: AtomicU64,
    pub cache_hits: AtomicU64,
    pub dropped: AtomicU64,
    pub collisions: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StatsCounters {
    pub(crate) fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
        }
    }
}
