//! Key-value store shared by the response cache, throttle counters, the IP
//! blocklist and the token denylist.
//!
//! The store is injected as `Arc<dyn KeyValueStore>` so the in-process
//! [`MemoryStore`] can be swapped for a networked backend (e.g. Redis)
//! without touching callers. Values are opaque strings; callers serialize
//! structured data as JSON.
//!
//! # Atomicity
//!
//! Each operation is atomic per key. [`KeyValueStore::increment`] in
//! particular must not lose updates under concurrent callers, since the
//! rate limiter relies on it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{AppError, AppResult};

/// Key-value store with per-entry expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; expired entries read as absent.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Write a value, replacing any previous one. `None` means no expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> AppResult<()>;

    /// Remove a key. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> AppResult<usize>;

    /// Atomically increment a counter, creating it at 1 with `ttl` when
    /// absent or expired. The expiry is not extended by later increments.
    async fn increment(&self, key: &str, ttl: Duration) -> AppResult<u64>;

    /// Whether a live entry exists for `key`.
    async fn exists(&self, key: &str) -> AppResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Liveness probe used by the readiness endpoint.
    async fn ping(&self) -> AppResult<()>;

    /// Drop expired entries. Backends with native expiry can keep the default.
    async fn purge_expired(&self) -> AppResult<usize> {
        Ok(0)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process store backed by a `HashMap` behind a `tokio::sync::RwLock`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> AppResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        trace!(prefix, removed, "Deleted keys by prefix");
        Ok(removed)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> AppResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get_mut(key)
            && entry.is_live(now)
        {
            let current: u64 = entry.value.parse().map_err(|_| {
                AppError::Storage(format!("value at '{key}' is not a counter"))
            })?;
            let next = current.saturating_add(1);
            entry.value = next.to_string();
            return Ok(next);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: "1".to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(1)
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("a", "1".to_string(), None).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.exists("a").await.unwrap());
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = MemoryStore::new();
        store
            .set("short", "v".to_string(), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.get("short").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("short").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_prefix_only_matches_prefix() {
        let store = MemoryStore::new();
        for key in ["products/all-1", "products/all-2", "products/1-10", "users/1"] {
            store.set(key, "x".to_string(), None).await.unwrap();
        }

        assert_eq!(store.delete_prefix("products/all-").await.unwrap(), 2);
        assert!(store.exists("products/1-10").await.unwrap());
        assert!(store.exists("users/1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_keeps_first_expiry() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);

        assert_eq!(store.increment("c", ttl).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.increment("c", ttl).await.unwrap(), 2);

        // The window opened by the first increment has closed
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.increment("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_counter() {
        let store = MemoryStore::new();
        store.set("c", "abc".to_string(), None).await.unwrap();
        assert!(store.increment("c", Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment("n", Duration::from_secs(60)).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("n").await.unwrap().as_deref(), Some("50"));
    }
}
