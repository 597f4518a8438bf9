//! SQLite-backed metadata store
//!
//! One table of text key/value pairs, created on open if missing. The quota
//! counts key and value bytes like the in-memory store.

use super::store::MetadataStore;
use crate::error::CacheError;
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub struct SqliteStore {
    pool: SqlitePool,
    quota_bytes: usize,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `db_path`
    pub async fn open(db_path: &Path, quota_bytes: usize) -> Result<Self, CacheError> {
        let newly_created = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::Store(format!("Create {} failed: {}", parent.display(), e)))?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        if newly_created {
            info!("Initialized new cache database: {}", db_path.display());
        } else {
            info!("Opened existing cache database: {}", db_path.display());
        }

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        Self::from_pool(pool, quota_bytes).await
    }

    /// Private in-memory database (single connection)
    pub async fn in_memory(quota_bytes: usize) -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool, quota_bytes).await
    }

    async fn from_pool(pool: SqlitePool, quota_bytes: usize) -> Result<Self, CacheError> {
        create_cache_table(&pool).await?;
        Ok(Self { pool, quota_bytes })
    }
}

async fn create_cache_table(pool: &SqlitePool) -> Result<(), CacheError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metadata_cache (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM metadata_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let used: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(length(CAST(key AS BLOB)) + length(CAST(value AS BLOB))), 0) \
             FROM metadata_cache WHERE key != ?",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        let needed = key.len() + value.len();
        let available = self.quota_bytes.saturating_sub(usize::try_from(used).unwrap_or(0));
        if needed > available {
            return Err(CacheError::QuotaExceeded { needed, available });
        }

        sqlx::query(
            "INSERT INTO metadata_cache (key, value, updated_at) VALUES (?, ?, datetime('now')) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM metadata_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT key FROM metadata_cache WHERE substr(key, 1, length(?)) = ?")
                .bind(prefix)
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = SqliteStore::in_memory(usize::MAX).await.unwrap();
        store.set("audio-metadata-a", "one".into()).await.unwrap();
        store.set("audio-metadata-a", "two".into()).await.unwrap();
        store.set("unrelated", "x".into()).await.unwrap();

        assert_eq!(store.get("audio-metadata-a").await.unwrap().as_deref(), Some("two"));
        assert_eq!(store.keys("audio-metadata-").await.unwrap(), vec!["audio-metadata-a"]);
        assert!(store.remove("audio-metadata-a").await.unwrap());
        assert!(store.get("audio-metadata-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let store = SqliteStore::in_memory(8).await.unwrap();
        store.set("k", "1234".into()).await.unwrap();
        let err = store.set("j", "12345".into()).await.unwrap_err();
        assert!(err.is_quota_exceeded());
    }
}
