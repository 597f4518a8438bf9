//! Key-value stores backing the metadata cache

use crate::error::CacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Text key-value store with a capacity limit
///
/// Implementations report a full store as [`CacheError::QuotaExceeded`];
/// the cache decides how to recover.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Insert or replace `key`
    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;

    /// Returns true if the key existed
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

/// In-memory store with a byte quota (key + value lengths)
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: usize,
}

impl MemoryStore {
    pub fn new(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes,
        }
    }

    /// Bytes currently used
    pub async fn used_bytes(&self) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;

        let used: usize = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum();
        let needed = key.len() + value.len();
        let available = self.quota_bytes.saturating_sub(used);

        if needed > available {
            return Err(CacheError::QuotaExceeded { needed, available });
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
