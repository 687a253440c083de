//! # Product Catalog
//!
//! A products REST API on Axum, featuring:
//!
//! - **Accounts**: signup, login and logout with HS256 JWT bearer tokens
//! - **Authorization**: role gate on product writes (admin only)
//! - **Caching**: versioned response cache keys over a shared key-value store
//! - **Protection**: safelist, blocklist and fixed-window throttles
//! - **Observability**: request IDs, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → Metrics → CORS → Throttle)│
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, accounts, products) + CurrentUser        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Services (ProductService, AccountService)                  │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  Repositories (products,     │  KeyValueStore (cache,       │
//! │  users)                      │  counters, denylist)         │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use product_catalog::repository::{MemoryProductRepository, MemoryUserRepository};
//! use product_catalog::store::MemoryStore;
//! use product_catalog::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(
//!         config,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(MemoryProductRepository::new()),
//!         Arc::new(MemoryUserRepository::new()),
//!     );
//!     let app = build_router(state)?;
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod repository;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::{Config, RuntimeEnv};
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
