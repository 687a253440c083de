//! Persistence for products and accounts.
//!
//! Handlers and services only see the [`ProductRepository`] and
//! [`UserRepository`] traits, held as `Arc<dyn ...>`. The in-memory
//! implementations back the binary and the test suites; a relational
//! backend would be another implementation of the same traits.

mod products;
mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{NewUser, Product, ProductAttributes, Role, User};

pub use products::MemoryProductRepository;
pub use users::MemoryUserRepository;

/// Aggregate state of the products table used to derive collection cache keys.
///
/// Any insert, update or delete changes `count` or `max_updated_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionState {
    pub count: u64,
    pub max_updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn collection_state(&self) -> AppResult<CollectionState>;

    async fn count(&self) -> AppResult<u64>;

    /// Products ordered by id, skipping `offset` and returning at most `limit`.
    async fn page(&self, offset: u64, limit: u64) -> AppResult<Vec<Product>>;

    async fn find(&self, id: i64) -> AppResult<Option<Product>>;

    /// Persist a new product. The store assigns `id` and both timestamps.
    async fn insert(&self, attributes: ProductAttributes) -> AppResult<Product>;

    /// Overwrite the attributes of an existing product and bump `updated_at`.
    ///
    /// Fails with `NotFound` when the id does not resolve.
    async fn update(&self, id: i64, attributes: ProductAttributes) -> AppResult<Product>;

    /// Remove a product. Returns whether a row was removed.
    async fn delete(&self, id: i64) -> AppResult<bool>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;

    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>>;

    /// Persist a new account. Fails with `Conflict` when the email is taken.
    async fn insert(&self, user: NewUser) -> AppResult<User>;

    /// Change the role of an existing account.
    async fn set_role(&self, id: i64, role: Role) -> AppResult<User>;
}
