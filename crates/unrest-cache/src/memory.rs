//! In-memory cache backend, used when the cache file cannot be opened.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::{expires_at, is_expired, now_millis};

#[derive(Clone, Debug)]
struct MemoryEntry {
    value: Arc<str>,
    expires_at: i64,
}

/// DashMap keyed by `(namespace, key)` with the same expiry rules as the
/// SQLite backend.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<(String, String), MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<String> {
        let map_key = (namespace.to_string(), key.to_string());
        let now = now_millis();

        let entry = self.entries.get(&map_key)?;
        if !is_expired(entry.expires_at, now) {
            return Some(entry.value.to_string());
        }
        let stale_at = entry.expires_at;
        drop(entry);

        self.entries
            .remove_if(&map_key, |_, e| e.expires_at == stale_at);
        tracing::debug!(namespace, key, "evicted expired cache entry");
        None
    }

    pub fn set(&self, namespace: &str, key: &str, value: &str, ttl: Duration) {
        self.entries.insert(
            (namespace.to_string(), key.to_string()),
            MemoryEntry {
                value: Arc::from(value),
                expires_at: expires_at(now_millis(), ttl),
            },
        );
    }

    pub fn invalidate(&self, namespace: &str, key: &str) {
        self.entries.remove(&(namespace.to_string(), key.to_string()));
    }

    pub fn invalidate_namespace(&self, namespace: &str) -> u64 {
        let before = self.entries.len();
        self.entries.retain(|(ns, _), _| ns != namespace);
        before.saturating_sub(self.entries.len()) as u64
    }

    /// Drops every expired entry, read or not. Returns how many went.
    pub fn purge_expired(&self) -> u64 {
        let now = now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, e| !is_expired(e.expires_at, now));
        before.saturating_sub(self.entries.len()) as u64
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
