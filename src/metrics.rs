//! Prometheus metrics for the catalog service.
//!
//! Metrics are exposed by the Prometheus exporter's own HTTP listener
//! (default `0.0.0.0:9090`, disabled with `METRICS_PORT=0`). Recording
//! functions are safe to call before or without initialization; they are
//! no-ops until a recorder is installed.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `catalog_cache_requests_total` - Cache lookups (labels: kind, outcome)
//! - `catalog_throttled_requests_total` - Requests rejected by a throttle (label: rule)
//! - `catalog_blocked_requests_total` - Requests rejected by the blocklist
//! - `catalog_products_written_total` - Committed product writes (label: operation)
//! - `catalog_auth_failures_total` - Failed authentications (label: reason)
//!
//! ## Histograms
//! - `catalog_request_duration_seconds` - Request duration (labels: endpoint, method, status)

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_REQUESTS_TOTAL: &str = "catalog_cache_requests_total";
    pub const THROTTLED_REQUESTS_TOTAL: &str = "catalog_throttled_requests_total";
    pub const BLOCKED_REQUESTS_TOTAL: &str = "catalog_blocked_requests_total";
    pub const PRODUCTS_WRITTEN_TOTAL: &str = "catalog_products_written_total";
    pub const AUTH_FAILURES_TOTAL: &str = "catalog_auth_failures_total";
    pub const REQUEST_DURATION_SECONDS: &str = "catalog_request_duration_seconds";
}

/// Initialize the Prometheus metrics exporter and describe every metric.
///
/// # Errors
///
/// Returns a message when the exporter cannot be installed (for example the
/// listener address is taken or a recorder is already installed).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::CACHE_REQUESTS_TOTAL,
        "Response cache lookups by kind (collection, record) and outcome (hit, miss)"
    );
    describe_counter!(
        names::THROTTLED_REQUESTS_TOTAL,
        "Requests rejected with 429 by a throttle rule"
    );
    describe_counter!(
        names::BLOCKED_REQUESTS_TOTAL,
        "Requests rejected with 403 by the IP blocklist"
    );
    describe_counter!(
        names::PRODUCTS_WRITTEN_TOTAL,
        "Committed product writes by operation"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Failed authentication attempts by reason"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record a cache lookup. `kind` is `collection` or `record`.
pub fn record_cache_lookup(kind: &'static str, hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(names::CACHE_REQUESTS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

/// Record a request rejected by the named throttle rule.
pub fn record_throttled(rule: &'static str) {
    counter!(names::THROTTLED_REQUESTS_TOTAL, "rule" => rule).increment(1);
}

/// Record a request rejected by the blocklist.
pub fn record_blocked() {
    counter!(names::BLOCKED_REQUESTS_TOTAL).increment(1);
}

/// Record a committed product write (`create`, `update` or `delete`).
pub fn record_product_written(operation: &'static str) {
    counter!(names::PRODUCTS_WRITTEN_TOTAL, "operation" => operation).increment(1);
}

/// Record a failed authentication.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record HTTP request duration.
pub fn record_request_duration(endpoint: &str, method: &str, status: &str, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "endpoint" => endpoint.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

/// Middleware recording the duration of every request.
///
/// The endpoint label is the matched route template (`/api/v1/products/{id}`),
/// never the raw path, so ids do not create unbounded label values.
pub async fn track_http(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    record_request_duration(
        &endpoint,
        &method,
        response.status().as_str(),
        start.elapsed().as_secs_f64(),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the recorders don't panic without an installed exporter.

    #[test]
    fn test_record_cache_lookup() {
        record_cache_lookup("collection", true);
        record_cache_lookup("record", false);
    }

    #[test]
    fn test_record_counters() {
        record_throttled("req/ip");
        record_blocked();
        record_product_written("create");
        record_auth_failure("invalid_token");
    }

    #[test]
    fn test_record_request_duration() {
        record_request_duration("/api/v1/products", "GET", "200", 0.1);
    }
}
