//! Throttling middleware with fixed-window counters in the shared store.
//!
//! # Algorithm
//!
//! Each [`ThrottleRule`] counts requests per discriminator (client IP, login
//! email or token subject) in period-aligned windows. The counter key is
//!
//! ```text
//! throttle:{rule name}:{epoch_secs / period}:{discriminator}
//! ```
//!
//! and is created with a TTL that outlives the window by one second, so
//! stale windows clean themselves up. Counters live in the injected
//! [`KeyValueStore`], which makes them shared by every instance pointing at
//! the same store.
//!
//! # Evaluation Order
//!
//! 1. Safelist: loopback clients pass untouched in development
//! 2. Blocklist: a `blocked:<ip>` key in the store answers 403
//! 3. Throttles, in declaration order. The first rule over its limit
//!    answers 429 and later rules are not counted for that request
//!
//! # Response on Throttle (429)
//!
//! - `Retry-After`: seconds until the current window closes
//! - Body: `{"error": "Rate limit exceeded", "message": ..., "retry_after": N}`
//!
//! # Store Failures
//!
//! A failing store never rejects traffic: the affected check is skipped and
//! logged at `warn`.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::auth::bearer_token;
use super::ip::{TrustedProxies, client_ip, is_loopback};
use crate::auth::JwtCodec;
use crate::error::{AppError, rate_limited_response};
use crate::metrics;
use crate::store::KeyValueStore;

/// Path of the login endpoint, throttled per IP and per submitted email.
pub const LOGIN_PATH: &str = "/login";

/// Path of the signup endpoint, throttled per IP.
pub const SIGNUP_PATH: &str = "/signup";

/// Prefix of the API routes throttled per token subject.
pub const API_PREFIX: &str = "/api/";

/// Store key marking an IP as blocked.
pub fn block_key(ip: &str) -> String {
    format!("blocked:{ip}")
}

/// Error type for throttle configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// A rule has a limit of zero.
    ZeroLimit(&'static str),
    /// A rule has a period shorter than one second.
    ZeroPeriod(&'static str),
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroLimit(rule) => {
                write!(f, "throttle '{rule}' must allow at least one request")
            }
            RateLimitError::ZeroPeriod(rule) => {
                write!(f, "throttle '{rule}' needs a period of at least one second")
            }
        }
    }
}

impl std::error::Error for RateLimitError {}

/// What a throttle counts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottleScope {
    /// Every request, by client IP.
    RequestsByIp,
    /// `POST /login`, by client IP.
    LoginsByIp,
    /// `POST /login`, by the lower-cased `user.email` of the body.
    LoginsByEmail,
    /// `POST /signup`, by client IP.
    SignupsByIp,
    /// Requests under `/api/`, by token subject or else client IP.
    ApiBySubject,
}

impl ThrottleScope {
    /// Rule name used in counter keys, logs and metrics.
    pub fn name(self) -> &'static str {
        match self {
            ThrottleScope::RequestsByIp => "req/ip",
            ThrottleScope::LoginsByIp => "logins/ip",
            ThrottleScope::LoginsByEmail => "logins/email",
            ThrottleScope::SignupsByIp => "signups/ip",
            ThrottleScope::ApiBySubject => "api/user",
        }
    }

    /// The counter discriminator for a request, or `None` when the scope
    /// does not apply to it.
    fn discriminator(self, facts: &RequestFacts) -> Option<String> {
        let is_post = facts.method == Method::POST;
        match self {
            ThrottleScope::RequestsByIp => Some(facts.ip.clone()),
            ThrottleScope::LoginsByIp if is_post && facts.path == LOGIN_PATH => {
                Some(facts.ip.clone())
            }
            ThrottleScope::LoginsByEmail if is_post && facts.path == LOGIN_PATH => {
                facts.login_email.clone()
            }
            ThrottleScope::SignupsByIp if is_post && facts.path == SIGNUP_PATH => {
                Some(facts.ip.clone())
            }
            ThrottleScope::ApiBySubject if facts.path.starts_with(API_PREFIX) => Some(
                facts
                    .subject
                    .clone()
                    .unwrap_or_else(|| facts.ip.clone()),
            ),
            _ => None,
        }
    }
}

/// A named fixed-window limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleRule {
    pub scope: ThrottleScope,
    pub limit: u64,
    pub period: Duration,
}

impl ThrottleRule {
    pub fn new(scope: ThrottleScope, limit: u64, period: Duration) -> Self {
        Self {
            scope,
            limit,
            period,
        }
    }

    /// The built-in rules, in evaluation order.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(ThrottleScope::RequestsByIp, 100, Duration::from_secs(60)),
            Self::new(ThrottleScope::LoginsByIp, 5, Duration::from_secs(20)),
            Self::new(ThrottleScope::LoginsByEmail, 5, Duration::from_secs(60)),
            Self::new(ThrottleScope::SignupsByIp, 3, Duration::from_secs(60)),
            Self::new(ThrottleScope::ApiBySubject, 300, Duration::from_secs(60)),
        ]
    }

    pub fn name(&self) -> &'static str {
        self.scope.name()
    }

    fn period_secs(&self) -> u64 {
        self.period.as_secs().max(1)
    }

    /// Counter key for `discriminator` in the window containing `now_secs`.
    pub fn counter_key(&self, discriminator: &str, now_secs: u64) -> String {
        format!(
            "throttle:{}:{}:{}",
            self.name(),
            now_secs / self.period_secs(),
            discriminator
        )
    }

    /// Seconds until the window containing `now_secs` closes. Always at least 1.
    pub fn retry_after(&self, now_secs: u64) -> u64 {
        let period = self.period_secs();
        period - (now_secs % period)
    }
}

/// The request attributes throttles are keyed on.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub ip: String,
    pub method: Method,
    pub path: String,
    /// Lower-cased `user.email` of a login body, when parsable
    pub login_email: Option<String>,
    /// `sub` of a valid bearer token, for API paths
    pub subject: Option<String>,
}

/// Outcome of evaluating a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Safelisted,
    Blocked,
    Throttled {
        rule: &'static str,
        retry_after: u64,
    },
}

/// Safelist, blocklist and throttle evaluation over the shared store.
pub struct Throttler {
    store: Arc<dyn KeyValueStore>,
    rules: Vec<ThrottleRule>,
    safelist_loopback: bool,
}

impl Throttler {
    /// Create a throttler.
    ///
    /// # Errors
    ///
    /// Returns an error if any rule has a zero limit or a sub-second period.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        rules: Vec<ThrottleRule>,
        safelist_loopback: bool,
    ) -> Result<Self, RateLimitError> {
        for rule in &rules {
            if rule.limit == 0 {
                return Err(RateLimitError::ZeroLimit(rule.name()));
            }
            if rule.period.as_secs() == 0 {
                return Err(RateLimitError::ZeroPeriod(rule.name()));
            }
        }

        Ok(Self {
            store,
            rules,
            safelist_loopback,
        })
    }

    pub fn rules(&self) -> &[ThrottleRule] {
        &self.rules
    }

    /// Evaluate a request against the current wall-clock window.
    pub async fn evaluate(&self, facts: &RequestFacts) -> Decision {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.evaluate_at(facts, now_secs).await
    }

    /// Evaluate a request as if the time were `now_secs` since the epoch.
    pub async fn evaluate_at(&self, facts: &RequestFacts, now_secs: u64) -> Decision {
        if self.safelist_loopback && is_loopback(&facts.ip) {
            return Decision::Safelisted;
        }

        match self.store.exists(&block_key(&facts.ip)).await {
            Ok(true) => return Decision::Blocked,
            Ok(false) => {}
            Err(e) => warn!(error = %e, client_ip = %facts.ip, "Blocklist lookup failed"),
        }

        for rule in &self.rules {
            let Some(discriminator) = rule.scope.discriminator(facts) else {
                continue;
            };

            let key = rule.counter_key(&discriminator, now_secs);
            let retry_after = rule.retry_after(now_secs);
            let ttl = Duration::from_secs(retry_after + 1);

            match self.store.increment(&key, ttl).await {
                Ok(count) if count > rule.limit => {
                    return Decision::Throttled {
                        rule: rule.name(),
                        retry_after,
                    };
                }
                Ok(count) => debug!(rule = rule.name(), count, "Throttle counted"),
                Err(e) => warn!(rule = rule.name(), error = %e, "Throttle counter failed"),
            }
        }

        Decision::Allow
    }
}

/// Tower layer applying a [`Throttler`] to every request.
///
/// # Example
///
/// ```rust,ignore
/// let throttler = Throttler::new(store, ThrottleRule::defaults(), false)?;
/// let app = Router::new()
///     .route("/api/v1/products", get(handler))
///     .layer(RateLimitLayer::new(Arc::new(throttler), jwt, trusted, 1024 * 1024));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    throttler: Arc<Throttler>,
    /// Resolves the subject of bearer tokens for the per-user API rule
    jwt: Arc<JwtCodec>,
    /// Proxies whose forwarding headers name the client
    trusted_proxies: Arc<TrustedProxies>,
    /// Upper bound when buffering login bodies
    max_body_size: usize,
}

impl RateLimitLayer {
    pub fn new(
        throttler: Arc<Throttler>,
        jwt: Arc<JwtCodec>,
        trusted_proxies: Arc<TrustedProxies>,
        max_body_size: usize,
    ) -> Self {
        Self {
            throttler,
            jwt,
            trusted_proxies,
            max_body_size,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            throttler: self.throttler.clone(),
            jwt: self.jwt.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    throttler: Arc<Throttler>,
    jwt: Arc<JwtCodec>,
    trusted_proxies: Arc<TrustedProxies>,
    max_body_size: usize,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let throttler = self.throttler.clone();
        let jwt = self.jwt.clone();
        let trusted_proxies = self.trusted_proxies.clone();
        let max_body_size = self.max_body_size;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let ip = client_ip(req.headers(), req.extensions(), &trusted_proxies).into_owned();
            let method = req.method().clone();
            let path = req.uri().path().to_string();

            let subject = if path.starts_with(API_PREFIX) {
                bearer_token(req.headers())
                    .and_then(|token| jwt.decode(token).ok())
                    .map(|claims| claims.sub)
            } else {
                None
            };

            let (req, login_email) = if method == Method::POST && path == LOGIN_PATH {
                match buffer_login_email(req, max_body_size).await {
                    Ok(buffered) => buffered,
                    Err(e) => return Ok(e.into_response()),
                }
            } else {
                (req, None)
            };

            let facts = RequestFacts {
                ip,
                method,
                path,
                login_email,
                subject,
            };

            match throttler.evaluate(&facts).await {
                Decision::Allow | Decision::Safelisted => inner.call(req).await,
                Decision::Blocked => {
                    metrics::record_blocked();
                    warn!(client_ip = %facts.ip, path = %facts.path, "Blocked request");
                    Ok(AppError::Forbidden("Request blocked".to_string()).into_response())
                }
                Decision::Throttled { rule, retry_after } => {
                    metrics::record_throttled(rule);
                    warn!(
                        client_ip = %facts.ip,
                        path = %facts.path,
                        rule,
                        retry_after_secs = retry_after,
                        "Rate limit exceeded"
                    );
                    Ok(rate_limited_response(retry_after))
                }
            }
        })
    }
}

/// Buffer a login body to read its email, then rebuild the request with
/// the same bytes for the handler.
async fn buffer_login_email(
    req: Request<Body>,
    limit: usize,
) -> Result<(Request<Body>, Option<String>), AppError> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|_| {
        AppError::PayloadTooLarge(format!("Request body exceeds {limit} bytes"))
    })?;

    let email = login_email(&bytes);
    Ok((Request::from_parts(parts, Body::from(bytes)), email))
}

/// Lower-cased `user.email` of a JSON login body.
fn login_email(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("user")?
        .get("email")?
        .as_str()
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty())
}
