//! Bearer token authentication.
//!
//! [`CurrentUser`] is an axum extractor: a handler that takes it only runs
//! for requests carrying a valid `Authorization: Bearer <jwt>` header whose
//! token has not been revoked and whose subject still exists. Everything
//! else is answered with 401 before the handler body runs.
//!
//! # Brute Force Protection
//!
//! Every rejected token is charged to the client IP in a per-minute
//! [`governor`] quota. Once the quota is spent the IP gets 429 with
//! `Retry-After` instead of 401, until the quota refills. Valid tokens are
//! never charged.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, header};
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tracing::{error, warn};

use super::ip::client_ip;
use crate::auth::Claims;
use crate::error::AppError;
use crate::metrics;
use crate::models::User;
use crate::state::AppState;

/// Message for requests that carry no token at all.
pub const MISSING_TOKEN_MESSAGE: &str = "You need to sign in or sign up before continuing.";

/// Default maximum rejected tokens per IP per minute.
pub const DEFAULT_AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::MIN.saturating_add(9);

/// Type alias for the auth failure rate limiter (per-IP).
type AuthFailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Per-IP budget for rejected bearer tokens.
#[derive(Clone)]
pub struct AuthFailureGuard {
    limiter: Arc<AuthFailureLimiter>,
}

impl AuthFailureGuard {
    pub fn new(failures_per_minute: NonZeroU32) -> Self {
        let quota = Quota::per_minute(failures_per_minute);
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Charge one failure to `ip`.
    ///
    /// Returns `Err(retry_after_secs)` once the IP has exhausted its budget.
    pub fn record_failure(&self, ip: &str) -> Result<(), u64> {
        self.limiter.check_key(&ip.to_string()).map_err(|not_until| {
            not_until
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1)
        })
    }

    /// Forget IPs whose budget has fully refilled.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }
}

impl Default for AuthFailureGuard {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_FAILURE_LIMIT)
    }
}

/// The token of an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively; an empty token is absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub claims: Claims,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            metrics::record_auth_failure("missing_token");
            return Err(AppError::Unauthorized(MISSING_TOKEN_MESSAGE.to_string()));
        };

        match state.accounts.authenticate(token).await {
            Ok(current) => Ok(current),
            Err(AppError::Unauthorized(message)) => {
                metrics::record_auth_failure("invalid_token");
                let ip = client_ip(&parts.headers, &parts.extensions, &state.trusted_proxies);

                if let Err(retry_after) = state.auth_guard.record_failure(&ip) {
                    error!(
                        client_ip = %ip,
                        retry_after_secs = retry_after,
                        "IP blocked due to excessive auth failures"
                    );
                    return Err(AppError::RateLimited { retry_after });
                }

                warn!(
                    path = %parts.uri.path(),
                    client_ip = %ip,
                    reason = %message,
                    "Rejected bearer token"
                );
                Err(AppError::Unauthorized(message))
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn auth_header(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&auth_header("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&auth_header("bearer   abc ")), Some("abc"));
        assert_eq!(bearer_token(&auth_header("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&auth_header("Bearer ")), None);
        assert_eq!(bearer_token(&auth_header("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_default_failure_limit() {
        assert_eq!(DEFAULT_AUTH_FAILURE_LIMIT.get(), 10);
    }

    #[test]
    fn test_guard_blocks_after_budget() {
        let guard = AuthFailureGuard::new(NonZeroU32::new(3).unwrap());

        for _ in 0..3 {
            assert!(guard.record_failure("10.0.0.1").is_ok());
        }
        let retry_after = guard.record_failure("10.0.0.1").unwrap_err();
        assert!(retry_after >= 1);

        // Budgets are per IP
        assert!(guard.record_failure("10.0.0.2").is_ok());
        guard.retain_recent();
    }
}
