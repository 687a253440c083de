use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Product, UserResponse};
use crate::pagination::PageMeta;

/// Single product response: `{"product": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResponse {
    pub product: Product,
}

/// Paginated product listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductListResponse {
    /// Products on the requested page, ordered by id
    pub products: Vec<Product>,
    /// Page navigation metadata
    pub meta: PageMeta,
}

/// Response for signup and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    /// Human readable outcome
    pub message: String,
    /// The signed up or logged in account
    pub data: UserResponse,
}

/// Response carrying only a message (logout).
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Whether the key-value store answered a ping
    pub store_connected: bool,
    /// Service version
    pub version: String,
    /// Seconds since startup
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}
