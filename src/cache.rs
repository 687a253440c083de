//! Response cache over the shared key-value store.
//!
//! Entries are JSON serialized payloads. Keys embed the state they were
//! computed from, so they rotate on every write:
//!
//! - collection: `products/all-{count}-{max_updated_at}-page-{page}-per-{per_page}`
//! - record: `products/{id}-{updated_at in microseconds}`
//!
//! Writes additionally delete the collection and record prefixes so stale
//! entries do not linger until their TTL. Store failures never fail a
//! request: a failed read is treated as a miss and a failed write is logged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::metrics;
use crate::models::{PRODUCTS_TABLE, Product};
use crate::pagination::Pagination;
use crate::repository::CollectionState;
use crate::store::KeyValueStore;

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key`, or run `compute`, cache its
    /// result and return it.
    ///
    /// Errors from `compute` are returned and nothing is cached.
    pub async fn fetch<T, F, Fut>(&self, kind: &'static str, key: &str, compute: F) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key, "Cache hit");
                    metrics::record_cache_lookup(kind, true);
                    return Ok(value);
                }
                Err(e) => warn!(key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "Cache read failed, computing value"),
        }

        debug!(key, "Cache miss");
        metrics::record_cache_lookup(kind, false);
        let value = compute().await?;

        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = self.store.set(key, raw, Some(self.ttl)).await {
                    warn!(key, error = %e, "Cache write failed");
                }
            }
            Err(e) => warn!(key, error = %e, "Failed to serialize cache entry"),
        }
        Ok(value)
    }

    /// Drop every cached listing page and every cached version of one product.
    pub async fn invalidate_product(&self, id: i64) {
        for prefix in [collection_prefix(), record_prefix(id)] {
            match self.store.delete_prefix(&prefix).await {
                Ok(removed) => debug!(prefix = %prefix, removed, "Cache invalidated"),
                Err(e) => warn!(prefix = %prefix, error = %e, "Cache invalidation failed"),
            }
        }
    }
}

fn collection_prefix() -> String {
    format!("{PRODUCTS_TABLE}/all-")
}

fn record_prefix(id: i64) -> String {
    format!("{PRODUCTS_TABLE}/{id}-")
}

/// Cache key for one page of the product listing.
///
/// The timestamp is rendered with microsecond precision and is empty for an
/// empty table.
pub fn collection_key(state: &CollectionState, page: &Pagination) -> String {
    let stamp = state
        .max_updated_at
        .map(|at| at.format("%Y%m%d%H%M%S%6f").to_string())
        .unwrap_or_default();
    format!(
        "{}{}-{}-page-{}-per-{}",
        collection_prefix(),
        state.count,
        stamp,
        page.page,
        page.per_page
    )
}

/// Cache key for one version of a product.
pub fn record_key(product: &Product) -> String {
    format!(
        "{}{}",
        record_prefix(product.id),
        product.updated_at.timestamp_micros()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::error::AppError;
    use crate::models::ProductStatus;
    use crate::store::MemoryStore;

    fn cache() -> (ResponseCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ResponseCache::new(store.clone(), DEFAULT_CACHE_TTL), store)
    }

    fn product(id: i64, micros: i64) -> Product {
        let at = Utc.timestamp_micros(micros).single().unwrap();
        Product {
            id,
            name: "Widget".to_string(),
            price: Decimal::new(999, 2),
            status: ProductStatus::Active,
            stock_quantity: 5,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_collection_key_format() {
        let state = CollectionState {
            count: 3,
            max_updated_at: Some(Utc.with_ymd_and_hms(2026, 1, 8, 18, 25, 17).unwrap()),
        };
        let key = collection_key(&state, &Pagination { page: 2, per_page: 10 });
        assert_eq!(key, "products/all-3-20260108182517000000-page-2-per-10");

        let empty = collection_key(&CollectionState::default(), &Pagination::default());
        assert_eq!(empty, "products/all-0--page-1-per-10");
    }

    #[test]
    fn test_record_key_uses_microseconds() {
        assert_eq!(record_key(&product(7, 1_700_000_000_123_456)), "products/7-1700000000123456");
        assert_ne!(
            record_key(&product(7, 1_700_000_000_123_456)),
            record_key(&product(7, 1_700_000_000_123_457))
        );
    }

    #[tokio::test]
    async fn test_fetch_computes_once() {
        let (cache, _) = cache();
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        for _ in 0..3 {
            let value: Vec<i64> = cache
                .fetch("collection", "k", move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_does_not_cache_errors() {
        let (cache, store) = cache();

        let result: AppResult<i64> = cache
            .fetch("record", "k", || async { Err(AppError::Internal("boom".into())) })
            .await;
        assert!(result.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(store, Duration::from_secs(10));
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1_i64)
        };

        cache.fetch("record", "k", compute).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.fetch("record", "k", compute).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_product_removes_listing_and_record() {
        let (cache, store) = cache();
        for key in [
            "products/all-1-x-page-1-per-10",
            "products/all-1-x-page-2-per-10",
            "products/7-100",
            "products/70-100",
        ] {
            store.set(key, "[]".to_string(), None).await.unwrap();
        }

        cache.invalidate_product(7).await;

        assert!(!store.exists("products/all-1-x-page-1-per-10").await.unwrap());
        assert!(!store.exists("products/7-100").await.unwrap());
        assert!(store.exists("products/70-100").await.unwrap());
    }
}
