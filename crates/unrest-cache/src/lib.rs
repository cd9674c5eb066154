//! Namespaced TTL cache.
//!
//! ## Backends
//!
//! - **SQLite**: a single local file, one table keyed by `(namespace, key)`.
//!   Survives restarts.
//! - **Memory**: a `DashMap` with identical semantics, per process.
//!
//! The backend is chosen once by [`CacheStore::open`]: if the file cannot be
//! created or opened the store falls back to memory for the life of the
//! process.
//!
//! ## Graceful Degradation
//!
//! The cache only ever speeds things up. Backend errors are logged and turned
//! into a miss (`get`) or a no-op (`set`, `invalidate*`); callers never see
//! them.

pub mod error;
pub mod memory;
pub mod sqlite;

use std::fmt;
use std::path::Path;
use std::time::Duration;

pub use error::{CacheError, Result};
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

pub(crate) fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn expires_at(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

/// An entry is live up to and including its expiry instant.
pub(crate) fn is_expired(expires_at: i64, now: i64) -> bool {
    now > expires_at
}

/// Which backend a [`CacheStore`] is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Sqlite,
    Memory,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKind::Sqlite => write!(f, "sqlite"),
            CacheKind::Memory => write!(f, "memory"),
        }
    }
}

/// The cache used by the request path.
#[derive(Clone, Debug)]
pub enum CacheStore {
    /// Durable, file-backed
    Sqlite(SqliteCache),

    /// Process-local fallback
    Memory(MemoryCache),
}

impl CacheStore {
    /// Opens the SQLite cache at `path`, falling back to memory if that fails.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match SqliteCache::open(path).await {
            Ok(cache) => {
                tracing::info!(path = %path.display(), "using SQLite cache");
                CacheStore::Sqlite(cache)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to open SQLite cache. Falling back to in-memory cache."
                );
                CacheStore::memory()
            }
        }
    }

    pub fn memory() -> Self {
        CacheStore::Memory(MemoryCache::new())
    }

    pub fn kind(&self) -> CacheKind {
        match self {
            CacheStore::Sqlite(_) => CacheKind::Sqlite,
            CacheStore::Memory(_) => CacheKind::Memory,
        }
    }

    /// Returns the live value, or `None` on miss, expiry or backend error.
    pub async fn get(&self, namespace: &str, key: &str) -> Option<String> {
        let result = match self {
            CacheStore::Sqlite(cache) => cache.get(namespace, key).await.unwrap_or_else(|e| {
                tracing::warn!(namespace, key, error = %e, "cache GET error");
                None
            }),
            CacheStore::Memory(cache) => cache.get(namespace, key),
        };

        if result.is_some() {
            tracing::debug!(namespace, key, "cache hit");
        } else {
            tracing::debug!(namespace, key, "cache miss");
        }
        result
    }

    /// Stores `value` for `ttl`, replacing any previous entry.
    pub async fn set(&self, namespace: &str, key: &str, value: &str, ttl: Duration) {
        match self {
            CacheStore::Sqlite(cache) => {
                if let Err(e) = cache.set(namespace, key, value, ttl).await {
                    tracing::warn!(namespace, key, error = %e, "cache SET error");
                }
            }
            CacheStore::Memory(cache) => cache.set(namespace, key, value, ttl),
        }
    }

    pub async fn invalidate(&self, namespace: &str, key: &str) {
        match self {
            CacheStore::Sqlite(cache) => {
                if let Err(e) = cache.invalidate(namespace, key).await {
                    tracing::warn!(namespace, key, error = %e, "cache DEL error");
                }
            }
            CacheStore::Memory(cache) => cache.invalidate(namespace, key),
        }
        tracing::debug!(namespace, key, "cache entry invalidated");
    }

    /// Drops every entry in `namespace`; other namespaces are untouched.
    ///
    /// Returns `false` when the backend failed and nothing was removed, so a
    /// caller holding pending work can retry it later.
    pub async fn invalidate_namespace(&self, namespace: &str) -> bool {
        let removed = match self {
            CacheStore::Sqlite(cache) => match cache.invalidate_namespace(namespace).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(namespace, error = %e, "cache namespace DEL error");
                    return false;
                }
            },
            CacheStore::Memory(cache) => cache.invalidate_namespace(namespace),
        };
        tracing::info!(namespace, removed, "cache namespace invalidated");
        true
    }

    /// Removes expired entries in every namespace, including keys that are
    /// never read again. Backend errors count as zero removed.
    pub async fn purge_expired(&self) -> u64 {
        let removed = match self {
            CacheStore::Sqlite(cache) => cache.purge_expired().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cache PURGE error");
                0
            }),
            CacheStore::Memory(cache) => cache.purge_expired(),
        };
        if removed > 0 {
            tracing::debug!(removed, "purged expired cache entries");
        }
        removed
    }

    /// Number of physically stored entries (including not-yet-evicted
    /// expired ones). Backend errors count as zero.
    pub async fn entry_count(&self) -> u64 {
        match self {
            CacheStore::Sqlite(cache) => cache.row_count().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cache COUNT error");
                0
            }),
            CacheStore::Memory(cache) => cache.len() as u64,
        }
    }
}
