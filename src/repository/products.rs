use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CollectionState, ProductRepository};
use crate::error::{AppError, AppResult};
use crate::models::{Product, ProductAttributes};

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<i64, Product>,
    last_id: i64,
    /// Last timestamp handed out, in microseconds since the epoch
    last_stamp: i64,
}

impl Inner {
    /// Next write timestamp: microsecond precision, strictly after the previous one.
    ///
    /// Record cache keys embed `updated_at` in microseconds, so two writes
    /// inside the same microsecond must still produce distinct stamps.
    fn next_stamp(&mut self) -> AppResult<DateTime<Utc>> {
        let micros = Utc::now().timestamp_micros().max(self.last_stamp + 1);
        self.last_stamp = micros;
        DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| AppError::Internal(format!("timestamp out of range: {micros}")))
    }
}

/// Products held in a `BTreeMap` keyed by id.
#[derive(Debug, Default)]
pub struct MemoryProductRepository {
    inner: RwLock<Inner>,
}

impl MemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductRepository for MemoryProductRepository {
    async fn collection_state(&self) -> AppResult<CollectionState> {
        let inner = self.inner.read().await;
        Ok(CollectionState {
            count: inner.rows.len() as u64,
            max_updated_at: inner.rows.values().map(|p| p.updated_at).max(),
        })
    }

    async fn count(&self) -> AppResult<u64> {
        Ok(self.inner.read().await.rows.len() as u64)
    }

    async fn page(&self, offset: u64, limit: u64) -> AppResult<Vec<Product>> {
        let inner = self.inner.read().await;
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(inner.rows.values().skip(skip).take(take).cloned().collect())
    }

    async fn find(&self, id: i64) -> AppResult<Option<Product>> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn insert(&self, attributes: ProductAttributes) -> AppResult<Product> {
        let mut inner = self.inner.write().await;
        let now = inner.next_stamp()?;
        inner.last_id += 1;

        let product = Product {
            id: inner.last_id,
            name: attributes.name,
            price: attributes.price,
            status: attributes.status,
            stock_quantity: attributes.stock_quantity,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update(&self, id: i64, attributes: ProductAttributes) -> AppResult<Product> {
        let mut inner = self.inner.write().await;
        if !inner.rows.contains_key(&id) {
            return Err(AppError::product_not_found(id));
        }
        let now = inner.next_stamp()?;

        let product = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| AppError::product_not_found(id))?;
        product.name = attributes.name;
        product.price = attributes.price;
        product.status = attributes.status;
        product.stock_quantity = attributes.stock_quantity;
        product.updated_at = now;
        Ok(product.clone())
    }

    async fn delete(&self, id: i64) -> AppResult<bool> {
        Ok(self.inner.write().await.rows.remove(&id).is_some())
    }
}
