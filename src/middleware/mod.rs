//! HTTP middleware and request extractors for security.
//!
//! - **Rate Limiting**: safelist, blocklist and fixed-window throttles
//!   backed by the shared key-value store
//! - **Authentication**: the [`CurrentUser`] bearer token extractor with a
//!   per-IP brute force guard
//! - **Client IP**: one resolution order shared by both, honoring
//!   forwarding headers only from trusted proxies
//!
//! # Architecture
//!
//! ```text
//! Request → Rate Limiter → Router → Handler(CurrentUser, ...) → Response
//!              ↓                          ↓
//!         403 blocked / 429          401 Unauthorized / 429
//! ```

pub mod auth;
pub mod ip;
pub mod rate_limit;

pub use auth::{AuthFailureGuard, CurrentUser, bearer_token};
pub use ip::{CidrRange, TrustedProxies, UNKNOWN_IP, client_ip, is_loopback};
pub use rate_limit::{
    Decision, RateLimitError, RateLimitLayer, RequestFacts, ThrottleRule, ThrottleScope,
    Throttler, block_key,
};
