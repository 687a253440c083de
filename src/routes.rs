//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets and echoes X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Metrics      │ ← Request duration histogram
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 403 blocked, 429 throttled
//! └────────┬─────────┘
//!          ▼
//!      Handler        ← CurrentUser: 401, role gate: 403
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/ready` - Health probes (no authentication)
//! - `/signup`, `/login`, `/logout` - Account lifecycle
//! - `/api/v1/products` - Product CRUD (authenticated, writes admin only)

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::header;
use axum::middleware::from_fn;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::metrics;
use crate::middleware::{RateLimitError, RateLimitLayer, Throttler};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Middleware Configuration
///
/// - **Rate Limiting**: enabled by `RATE_LIMIT_ENABLED`; loopback clients
///   are safelisted in development only
/// - **CORS**: configured from `cors_allowed_origins`; the `Authorization`
///   header is exposed so browsers can read tokens issued by `/login`
///
/// # Errors
///
/// Returns `RateLimitError` if a throttle rule is invalid.
pub fn build_router(state: AppState) -> Result<Router, RateLimitError> {
    let config = state.config.clone();

    let mut router = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // Accounts
        .route("/signup", post(handlers::signup))
        .route("/login", post(handlers::login))
        .route("/logout", delete(handlers::logout))
        // Products
        .route(
            "/api/v1/products",
            get(handlers::list_products).post(handlers::create_product),
        )
        .route(
            "/api/v1/products/{id}",
            get(handlers::get_product)
                .put(handlers::update_product)
                .patch(handlers::update_product)
                .delete(handlers::delete_product),
        );

    // =========================================================================
    // Apply Middleware Stack (order matters - last added runs first)
    // =========================================================================

    // 1. Request body size limit
    info!(
        max_size_kb = config.max_request_body_size / 1024,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. Safelist, blocklist and throttles (if enabled)
    if config.rate_limit_enabled {
        let throttler = Throttler::new(
            state.store.clone(),
            config.throttles.clone(),
            config.environment.is_development(),
        )?;
        info!(
            rules = throttler.rules().len(),
            safelist_loopback = config.environment.is_development(),
            trusted_proxies = state.trusted_proxies.is_enabled(),
            "Rate limiting enabled"
        );
        router = router.layer(RateLimitLayer::new(
            Arc::new(throttler),
            state.jwt.clone(),
            state.trusted_proxies.clone(),
            config.max_request_body_size,
        ));
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_ENABLED=false)");
    }

    // 3. CORS
    router = router.layer(build_cors_layer(&config.cors_allowed_origins));

    // 4. Metrics
    router = router.layer(from_fn(metrics::track_http));

    // 5. Tracing
    router = router.layer(TraceLayer::new_for_http());

    // 6. Request ID: propagate must wrap inside set so the response sees it
    router = router.layer(PropagateRequestIdLayer::x_request_id());
    router = router.layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    Ok(router.with_state(state))
}

/// Build CORS layer from configuration.
///
/// `*` in `allowed_origins` allows any origin, which should be avoided in
/// production.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    let layer = if allow_any {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    layer
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::AUTHORIZATION])
}
