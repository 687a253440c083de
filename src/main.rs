use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use product_catalog::repository::{MemoryProductRepository, MemoryUserRepository};
use product_catalog::store::MemoryStore;
use product_catalog::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // RUST_LOG and LOG_FORMAT may come from .env
    let _ = dotenvy::dotenv();
    init_tracing();

    info!(
        "Starting Product Catalog v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Install the global subscriber; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Create or promote the configured admin account.
async fn seed_admin(state: &AppState, email: &str, password: &str) -> anyhow::Result<()> {
    let admin = state
        .accounts
        .ensure_admin(email, password)
        .await
        .with_context(|| format!("failed to seed admin account {email}"))?;
    info!(user_id = admin.id, "Admin account ready");
    Ok(())
}

/// Run the application, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        environment = %config.environment,
        rate_limit_enabled = config.rate_limit_enabled,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    // Build application state over the in-process store and repositories
    let state = AppState::new(
        config.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryProductRepository::new()),
        Arc::new(MemoryUserRepository::new()),
    );

    if let Some((email, password)) = config.admin_seed() {
        seed_admin(&state, email, password).await.map_err(|e| {
            error!("{e:#}");
            exitcode::CONFIG
        })?;
    }

    let app = build_router(state.clone()).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET    /health                - Health check");
    info!("  GET    /ready                 - Readiness check");
    info!("  POST   /signup                - Create an account");
    info!("  POST   /login                 - Obtain a bearer token");
    info!("  DELETE /logout                - Revoke the current token");
    info!("  GET    /api/v1/products       - List products");
    info!("  POST   /api/v1/products       - Create product (admin)");
    info!("  GET    /api/v1/products/{{id}}  - Get product");
    info!("  PUT    /api/v1/products/{{id}}  - Update product (admin)");
    info!("  PATCH  /api/v1/products/{{id}}  - Update product (admin)");
    info!("  DELETE /api/v1/products/{{id}}  - Delete product (admin)");

    // Client addresses feed the throttles when no proxy header is present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    // Gracefully shutdown background tasks
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
