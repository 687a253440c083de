//! Shared application state for Axum handlers.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers and the authentication extractor:
//!
//! - **Services**: product catalog and account lifecycle
//! - **Store**: the key-value store behind the cache, throttles and denylist
//! - **Auth**: the JWT codec and the brute force guard
//! - **Configuration**: runtime configuration access
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::auth::JwtCodec;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::middleware::{AuthFailureGuard, TrustedProxies};
use crate::repository::{ProductRepository, UserRepository};
use crate::services::{AccountService, ProductService};
use crate::store::KeyValueStore;

/// Shared application state for Axum handlers.
///
/// Cloned for each request; everything inside is `Arc`-backed.
///
/// # Lifecycle
///
/// The store sweeper is spawned on creation. Call `shutdown()` before
/// dropping to ensure clean task termination:
///
/// ```rust,ignore
/// let state = AppState::new(config, store, products, users);
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Product catalog operations
    pub products: ProductService,
    /// Signup, login, logout and token verification
    pub accounts: AccountService,
    /// Key-value store shared by cache, throttles and token denylist
    pub store: Arc<dyn KeyValueStore>,
    /// Token signing and verification
    pub jwt: Arc<JwtCodec>,
    /// Per-IP budget for rejected tokens
    pub auth_guard: AuthFailureGuard,
    /// Proxies allowed to report the client address
    pub trusted_proxies: Arc<TrustedProxies>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Wire services over the given store and repositories.
    ///
    /// Must be called inside a tokio runtime: the store sweeper task is
    /// spawned here and runs every `config.store_sweep_interval`.
    pub fn new(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        products: Arc<dyn ProductRepository>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        let config = Arc::new(config);
        let jwt = Arc::new(JwtCodec::new(&config.jwt_secret, config.jwt_expiration));
        let cache = ResponseCache::new(store.clone(), config.cache_ttl);
        let auth_guard = NonZeroU32::new(config.auth_failure_limit_per_minute)
            .map(AuthFailureGuard::new)
            .unwrap_or_default();

        let state = Self {
            products: ProductService::new(products, cache, config.environment),
            accounts: AccountService::new(users, store.clone(), jwt.clone(), config.bcrypt_cost),
            store,
            jwt,
            auth_guard,
            trusted_proxies: Arc::new(TrustedProxies::new(&config.trusted_proxies)),
            started_at: Instant::now(),
            config,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_store_sweeper();

        state
    }

    /// Spawn the task that purges expired store entries and forgets idle
    /// brute force budgets.
    fn spawn_store_sweeper(&self) {
        let store = self.store.clone();
        let auth_guard = self.auth_guard.clone();
        let period = self.config.store_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Store sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        match store.purge_expired().await {
                            Ok(0) => trace!("Store sweep found nothing to purge"),
                            Ok(purged) => debug!(purged, "Purged expired store entries"),
                            Err(e) => warn!(error = %e, "Store sweep failed"),
                        }
                        auth_guard.retain_recent();
                    }
                }
            }

            debug!("Store sweeper shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// Signals cancellation, closes the tracker and waits for every task.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
