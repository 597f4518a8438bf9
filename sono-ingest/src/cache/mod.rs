//! Content-addressed metadata cache
//!
//! Maps a content digest to an immutable snapshot of extracted metadata and
//! resolved artwork. Entries live under `audio-metadata-<digest>` in a
//! [`MetadataStore`] as JSON text (byte payloads base64-encoded).
//!
//! Writes never replace an existing entry: identical content is a no-op and
//! different content is reported as a collision (first write wins).

mod sqlite;
mod store;

pub use sqlite::SqliteStore;
pub use store::{MemoryStore, MetadataStore};

use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sono_common::config::CacheConfig;
use sono_common::events::{EventBus, SonoEvent};
use sono_common::{ArtworkSource, TrackMetadata};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Namespace prefix for cache keys
pub const KEY_PREFIX: &str = "audio-metadata-";

/// Store key for a content digest
pub fn cache_key(digest: &str) -> String {
    format!("{}{}", KEY_PREFIX, digest)
}

/// Cached snapshot for one digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub metadata: TrackMetadata,
    pub artwork: Option<ArtworkSource>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(metadata: TrackMetadata, artwork: Option<ArtworkSource>) -> Self {
        Self {
            metadata,
            artwork,
            created_at: Utc::now(),
        }
    }

    fn same_content(&self, other: &CacheEntry) -> bool {
        self.metadata == other.metadata && self.artwork == other.artwork
    }

    fn without_artwork(mut self) -> Self {
        self.metadata.artwork = None;
        self.artwork = None;
        self
    }
}

/// Result of [`MetadataCache::store`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// Identical content already cached
    Unchanged,
    /// Different content already cached under this digest; kept as is
    Collision,
    /// Store full even after eviction; write skipped
    QuotaExceeded,
}

pub struct MetadataCache {
    store: Arc<dyn MetadataStore>,
    config: CacheConfig,
    events: EventBus,
}

impl MetadataCache {
    pub fn new(store: Arc<dyn MetadataStore>, config: CacheConfig, events: EventBus) -> Self {
        Self { store, config, events }
    }

    /// In-memory cache using the configured quota
    pub fn in_memory(config: CacheConfig, events: EventBus) -> Self {
        let store = Arc::new(MemoryStore::new(config.quota_bytes));
        Self::new(store, config, events)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn lookup(&self, digest: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.read_entry(&cache_key(digest)).await
    }

    async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                self.store.remove(key).await?;
                Ok(None)
            }
        }
    }

    /// Write the snapshot for `digest` unless one already exists
    pub async fn store(
        &self,
        digest: &str,
        metadata: &TrackMetadata,
        artwork: Option<&ArtworkSource>,
    ) -> Result<StoreOutcome, CacheError> {
        let key = cache_key(digest);
        let (entry, serialized) = self.prepare_entry(CacheEntry::new(metadata.clone(), artwork.cloned()))?;

        if let Some(existing) = self.read_entry(&key).await? {
            if existing.same_content(&entry) {
                debug!(key = %key, "Cache entry unchanged");
                return Ok(StoreOutcome::Unchanged);
            }

            warn!(key = %key, "Cache collision: different metadata for identical digest, keeping first entry");
            self.events.emit_lossy(SonoEvent::CacheCollision {
                key: digest.to_string(),
                timestamp: Utc::now(),
            });
            return Ok(StoreOutcome::Collision);
        }

        match self.write_with_quota_retry(&key, serialized).await? {
            StoreOutcome::QuotaExceeded => {
                warn!(key = %key, "Cache write skipped: storage quota exceeded");
                self.events.emit_lossy(SonoEvent::CacheWriteSkipped {
                    key: digest.to_string(),
                    reason: "quota exceeded".to_string(),
                    timestamp: Utc::now(),
                });
                Ok(StoreOutcome::QuotaExceeded)
            }
            outcome => {
                debug!(key = %key, "Cached metadata snapshot");
                self.enforce_ceiling().await;
                Ok(outcome)
            }
        }
    }

    /// Serialize, dropping artwork payloads when the entry is too large
    fn prepare_entry(&self, entry: CacheEntry) -> Result<(CacheEntry, String), CacheError> {
        let serialized = serde_json::to_string(&entry)?;
        if serialized.len() <= self.config.max_entry_bytes {
            return Ok((entry, serialized));
        }

        debug!(
            bytes = serialized.len(),
            limit = self.config.max_entry_bytes,
            "Cache entry too large, dropping artwork payloads"
        );
        let entry = entry.without_artwork();
        let serialized = serde_json::to_string(&entry)?;
        Ok((entry, serialized))
    }

    async fn write_with_quota_retry(&self, key: &str, value: String) -> Result<StoreOutcome, CacheError> {
        match self.store.set(key, value.clone()).await {
            Ok(()) => Ok(StoreOutcome::Stored),
            Err(e) if e.is_quota_exceeded() => {
                info!(key = %key, "Cache quota reached, evicting oldest entries");
                self.evict_oldest(self.config.evict_batch).await?;
                match self.store.set(key, value).await {
                    Ok(()) => Ok(StoreOutcome::Stored),
                    Err(e) if e.is_quota_exceeded() => Ok(StoreOutcome::QuotaExceeded),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn enforce_ceiling(&self) {
        let count = match self.len().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to count cache entries");
                return;
            }
        };

        if count > self.config.max_entries {
            if let Err(e) = self.evict_oldest(self.config.evict_batch).await {
                warn!(error = %e, "Cache eviction failed");
            }
        }
    }

    /// (key, created_at) for every entry, oldest first; unreadable entries
    /// sort first
    async fn entries_by_age(&self) -> Result<Vec<(String, Option<DateTime<Utc>>)>, CacheError> {
        let mut aged = Vec::new();
        for key in self.store.keys(KEY_PREFIX).await? {
            let created_at = self
                .store
                .get(&key)
                .await?
                .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok())
                .map(|entry| entry.created_at);
            aged.push((key, created_at));
        }
        aged.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(aged)
    }

    /// Remove the `n` entries with the oldest `created_at`
    pub async fn evict_oldest(&self, n: usize) -> Result<usize, CacheError> {
        let mut removed = 0;
        for (key, _) in self.entries_by_age().await?.into_iter().take(n) {
            if self.store.remove(&key).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(count = removed, "Evicted oldest cache entries");
            self.events.emit_lossy(SonoEvent::CacheEvicted {
                count: removed,
                timestamp: Utc::now(),
            });
        }
        Ok(removed)
    }

    /// Remove entries created more than `max_age` ago
    pub async fn expire_older_than(&self, max_age: chrono::Duration) -> Result<usize, CacheError> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;

        for (key, created_at) in self.entries_by_age().await? {
            let expired = created_at.map(|t| t < cutoff).unwrap_or(true);
            if !expired {
                // Sorted oldest first
                break;
            }
            if self.store.remove(&key).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(count = removed, "Expired old cache entries");
            self.events.emit_lossy(SonoEvent::CacheEvicted {
                count: removed,
                timestamp: Utc::now(),
            });
        }
        Ok(removed)
    }

    /// Remove every cache entry (other keys in the store are untouched)
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in self.store.keys(KEY_PREFIX).await? {
            if self.store.remove(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.store.keys(KEY_PREFIX).await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len().await? == 0)
    }
}
