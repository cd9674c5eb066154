//! File-backed cache table.

use std::path::Path;
use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_sqlite::{Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::{expires_at, is_expired, now_millis};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace  TEXT    NOT NULL,
    key        TEXT    NOT NULL,
    value      TEXT    NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (namespace, key)
)"#;

const UPSERT: &str = r#"
INSERT INTO cache_entries (namespace, key, value, expires_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (namespace, key)
DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at"#;

/// SQLite cache backend.
///
/// One row per `(namespace, key)` holding the serialized value and an
/// absolute expiry in Unix milliseconds.
#[derive(Clone, Debug)]
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    /// Opens (creating if needed) the cache file and its parent directory,
    /// and ensures the table exists.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = PoolOptions::<Sqlite>::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        query(CREATE_TABLE).execute(&pool).await?;

        let cache = Self { pool };
        let purged = cache.purge_expired().await?;
        info!(purged, "SQLite cache ready");

        Ok(cache)
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let row: Option<(String, i64)> = query_as(
            "SELECT value, expires_at FROM cache_entries WHERE namespace = ?1 AND key = ?2",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some((value, expires)) = row else {
            return Ok(None);
        };

        let now = now_millis();
        if is_expired(expires, now) {
            // Only delete if a concurrent writer has not refreshed the row.
            query("DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2 AND expires_at = ?3")
                .bind(namespace)
                .bind(key)
                .bind(expires)
                .execute(&self.pool)
                .await?;
            debug!(namespace, key, "evicted expired cache entry");
            return Ok(None);
        }

        Ok(Some(value))
    }

    pub async fn set(&self, namespace: &str, key: &str, value: &str, ttl: Duration) -> Result<()> {
        query(UPSERT)
            .bind(namespace)
            .bind(key)
            .bind(value)
            .bind(expires_at(now_millis(), ttl))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn invalidate(&self, namespace: &str, key: &str) -> Result<()> {
        query("DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes every row in `namespace`, returning how many were removed.
    pub async fn invalidate_namespace(&self, namespace: &str) -> Result<u64> {
        let result = query("DELETE FROM cache_entries WHERE namespace = ?1")
            .bind(namespace)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Deletes all rows whose expiry has passed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = query("DELETE FROM cache_entries WHERE expires_at < ?1")
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of stored rows, expired or not.
    pub async fn row_count(&self) -> Result<u64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
