//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `JWT_SECRET`: HMAC secret for signing tokens (required when `APP_ENV=production`)
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins (default: `*` for dev)
//! - `ADMIN_EMAIL` / `ADMIN_PASSWORD`: Seed an admin account at startup
//! - `TRUSTED_PROXIES`: Comma-separated CIDR ranges whose forwarding headers
//!   name the client (default: none, the socket peer is the client)
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_ENABLED`: Toggle all throttles (default: true)
//! - `THROTTLE_REQ_IP_LIMIT` / `THROTTLE_REQ_IP_PERIOD_SECS`: Global per-IP (100 / 60)
//! - `THROTTLE_LOGIN_IP_LIMIT` / `THROTTLE_LOGIN_IP_PERIOD_SECS`: Login per-IP (5 / 20)
//! - `THROTTLE_LOGIN_EMAIL_LIMIT` / `THROTTLE_LOGIN_EMAIL_PERIOD_SECS`: Login per-email (5 / 60)
//! - `THROTTLE_SIGNUP_IP_LIMIT` / `THROTTLE_SIGNUP_IP_PERIOD_SECS`: Signup per-IP (3 / 60)
//! - `THROTTLE_API_USER_LIMIT` / `THROTTLE_API_USER_PERIOD_SECS`: API per-subject (300 / 60)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::middleware::ip::CidrRange;
use crate::middleware::rate_limit::{ThrottleRule, ThrottleScope};

/// Development-only signing secret used when `JWT_SECRET` is unset.
const DEV_JWT_SECRET: &str = "development-secret-change-me";

/// Work factor bounds accepted by bcrypt.
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

/// Runtime environment, controlling the loopback safelist and the
/// creation notification hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnv {
    Development,
    Test,
    Production,
}

impl RuntimeEnv {
    pub fn is_production(self) -> bool {
        self == RuntimeEnv::Production
    }

    pub fn is_development(self) -> bool {
        self == RuntimeEnv::Development
    }
}

impl FromStr for RuntimeEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RuntimeEnv::Development),
            "test" => Ok(RuntimeEnv::Test),
            "production" | "prod" => Ok(RuntimeEnv::Production),
            other => Err(format!(
                "unknown environment '{other}' (expected development, test or production)"
            )),
        }
    }
}

impl fmt::Display for RuntimeEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeEnv::Development => "development",
            RuntimeEnv::Test => "test",
            RuntimeEnv::Production => "production",
        };
        f.write_str(name)
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Runtime environment (default: development)
    pub environment: RuntimeEnv,

    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// HMAC secret for HS256 tokens
    pub jwt_secret: String,

    /// Lifetime of issued tokens (default: 24 hours)
    pub jwt_expiration: Duration,

    /// bcrypt work factor (default: 12)
    pub bcrypt_cost: u32,

    /// Invalid bearer tokens tolerated per IP per minute before answering 429 (default: 10)
    pub auth_failure_limit_per_minute: u32,

    /// Admin account created at startup when both are set
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// TTL for cached product payloads (default: 1 hour)
    pub cache_ttl: Duration,

    /// Interval for purging expired store entries (default: 60 seconds)
    pub store_sweep_interval: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Whether the throttling middleware is installed (default: true)
    pub rate_limit_enabled: bool,

    /// Throttle rules in evaluation order
    pub throttles: Vec<ThrottleRule>,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    /// CIDR ranges of reverse proxies whose `X-Forwarded-For` / `X-Real-IP`
    /// are believed. Empty means the socket peer is always the client.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment: RuntimeEnv = Self::parse_env("APP_ENV", RuntimeEnv::Development)?;

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            environment,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,

            // Authentication
            jwt_secret: Self::jwt_secret(environment)?,
            jwt_expiration: Duration::from_secs(Self::parse_env("JWT_EXPIRATION_SECS", 86_400)?),
            bcrypt_cost: Self::parse_env("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            auth_failure_limit_per_minute: Self::parse_env("AUTH_FAILURE_LIMIT_PER_MINUTE", 10)?,
            admin_email: env::var("ADMIN_EMAIL").ok().filter(|v| !v.is_empty()),
            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|v| !v.is_empty()),

            // Cache
            cache_ttl: Duration::from_secs(Self::parse_env("CACHE_TTL_SECS", 3600)?),
            store_sweep_interval: Duration::from_secs(Self::parse_env(
                "STORE_SWEEP_INTERVAL_SECS",
                60,
            )?),

            // Rate limiting
            rate_limit_enabled: Self::parse_env("RATE_LIMIT_ENABLED", true)?,
            throttles: Self::parse_throttles()?,

            // Security
            cors_allowed_origins: Self::parse_cors_origins(),
            trusted_proxies: Self::parse_trusted_proxies(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        if self.jwt_secret.len() < 16 {
            return Err(AppError::ConfigError(
                "JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }

        if self.jwt_expiration.is_zero() {
            return Err(AppError::ConfigError(
                "JWT_EXPIRATION_SECS must be greater than 0".to_string(),
            ));
        }

        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.bcrypt_cost) {
            return Err(AppError::ConfigError(format!(
                "BCRYPT_COST must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}"
            )));
        }

        if self.cache_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "CACHE_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.store_sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "STORE_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.auth_failure_limit_per_minute == 0 {
            return Err(AppError::ConfigError(
                "AUTH_FAILURE_LIMIT_PER_MINUTE must be greater than 0".to_string(),
            ));
        }

        for rule in &self.throttles {
            if rule.limit == 0 || rule.period.as_secs() == 0 {
                return Err(AppError::ConfigError(format!(
                    "Throttle '{}' needs a positive limit and a period of at least one second",
                    rule.name()
                )));
            }
        }

        if let Some(bad) = self
            .trusted_proxies
            .iter()
            .find(|cidr| CidrRange::parse(cidr).is_none())
        {
            return Err(AppError::ConfigError(format!(
                "Invalid CIDR range in TRUSTED_PROXIES: {bad}"
            )));
        }

        if self.admin_email.is_some() != self.admin_password.is_some() {
            return Err(AppError::ConfigError(
                "ADMIN_EMAIL and ADMIN_PASSWORD must be set together".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Admin seed credentials, when configured.
    pub fn admin_seed(&self) -> Option<(&str, &str)> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            _ => None,
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Resolve the signing secret. Production refuses to start without one.
    fn jwt_secret(environment: RuntimeEnv) -> AppResult<String> {
        match env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()) {
            Some(secret) => Ok(secret),
            None if environment.is_production() => Err(AppError::ConfigError(
                "JWT_SECRET is required in production".to_string(),
            )),
            None => Ok(DEV_JWT_SECRET.to_string()),
        }
    }

    /// Build the throttle rules, applying any per-rule overrides.
    fn parse_throttles() -> AppResult<Vec<ThrottleRule>> {
        ThrottleRule::defaults()
            .into_iter()
            .map(|rule| {
                let prefix = rule.scope.env_prefix();
                let limit = Self::parse_env(&format!("{prefix}_LIMIT"), rule.limit)?;
                let period = Self::parse_env(&format!("{prefix}_PERIOD_SECS"), rule.period.as_secs())?;
                Ok(ThrottleRule::new(rule.scope, limit, Duration::from_secs(period)))
            })
            .collect()
    }

    /// Parse CORS allowed origins from environment variable.
    fn parse_cors_origins() -> Vec<String> {
        env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Parse trusted proxy CIDR ranges (comma-separated, empty by default).
    fn parse_trusted_proxies() -> Vec<String> {
        env::var("TRUSTED_PROXIES")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl ThrottleScope {
    fn env_prefix(self) -> &'static str {
        match self {
            ThrottleScope::RequestsByIp => "THROTTLE_REQ_IP",
            ThrottleScope::LoginsByIp => "THROTTLE_LOGIN_IP",
            ThrottleScope::LoginsByEmail => "THROTTLE_LOGIN_EMAIL",
            ThrottleScope::SignupsByIp => "THROTTLE_SIGNUP_IP",
            ThrottleScope::ApiBySubject => "THROTTLE_API_USER",
        }
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: RuntimeEnv::Development,
            max_request_body_size: 1024 * 1024,
            // Authentication
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_expiration: Duration::from_secs(86_400),
            bcrypt_cost: bcrypt::DEFAULT_COST,
            auth_failure_limit_per_minute: 10,
            admin_email: None,
            admin_password: None,
            // Cache
            cache_ttl: Duration::from_secs(3600),
            store_sweep_interval: Duration::from_secs(60),
            // Rate limiting
            rate_limit_enabled: true,
            throttles: ThrottleRule::defaults(),
            // Security
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: Vec::new(),
            // Observability
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.environment, RuntimeEnv::Development);
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.throttles.len(), 5);
        assert!(config.rate_limit_enabled);
        assert!(config.admin_seed().is_none());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_runtime_env_parsing() {
        assert_eq!("production".parse::<RuntimeEnv>().unwrap(), RuntimeEnv::Production);
        assert_eq!(" Test ".parse::<RuntimeEnv>().unwrap(), RuntimeEnv::Test);
        assert_eq!("dev".parse::<RuntimeEnv>().unwrap(), RuntimeEnv::Development);
        assert!("staging".parse::<RuntimeEnv>().is_err());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_short_secret() {
        let config = Config {
            jwt_secret: "short".to_string(),
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_validate_bcrypt_cost_range() {
        let config = Config {
            bcrypt_cost: 40,
            ..Config::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("BCRYPT_COST"));
    }

    #[test]
    fn test_validate_zero_throttle_limit() {
        let config = Config {
            throttles: vec![ThrottleRule::new(
                ThrottleScope::RequestsByIp,
                0,
                Duration::from_secs(60),
            )],
            ..Config::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("req/ip"));
    }

    #[test]
    fn test_validate_trusted_proxies() {
        let config = Config {
            trusted_proxies: vec!["10.0.0.0/8".to_string(), "::1".to_string()],
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        let config = Config {
            trusted_proxies: vec!["10.0.0.0/40".to_string()],
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("TRUSTED_PROXIES"));
    }

    #[test]
    fn test_validate_admin_seed_pairing() {
        let config = Config {
            admin_email: Some("admin@example.com".to_string()),
            ..Config::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("ADMIN_EMAIL"));
    }

    #[test]
    fn test_metrics_addr_disabled() {
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }
}
