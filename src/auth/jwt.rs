//! HS256 JSON Web Tokens.
//!
//! Claims are `{sub, jti, iat, exp}`. `sub` is the user id as a string and
//! `jti` a random UUID, used to revoke a single token on logout.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::User;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// The user id carried in `sub`.
    pub fn user_id(&self) -> AppResult<i64> {
        self.sub
            .parse()
            .map_err(|_| AppError::Unauthorized("Invalid token".to_string()))
    }

    /// Time left before expiry, or `None` when already expired.
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.exp - Utc::now().timestamp();
        u64::try_from(left)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// A freshly signed token with its claims.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Signs and verifies tokens with one shared secret.
#[derive(Clone)]
pub struct JwtCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    expiration: Duration,
}

impl std::fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtCodec")
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl JwtCodec {
    pub fn new(secret: &str, expiration: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            expiration,
        }
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Sign a token for `user`, valid for the configured expiration.
    pub fn issue(&self, user: &User) -> AppResult<IssuedToken> {
        let iat = Utc::now().timestamp();
        let lifetime = i64::try_from(self.expiration.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user.id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat,
            exp: iat.saturating_add(lifetime),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {e}")))?;
        Ok(IssuedToken { token, claims })
    }

    /// Verify signature and expiry and return the claims.
    pub fn decode(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => {
                    AppError::Unauthorized("Signature has expired".to_string())
                }
                _ => AppError::Unauthorized("Invalid token".to_string()),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::Role;

    const SECRET: &str = "test-secret-at-least-16-chars";

    fn user() -> User {
        User {
            id: 42,
            email: "a@example.com".to_string(),
            password_hash: String::new(),
            role: Role::User,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_issue_then_decode() {
        let codec = JwtCodec::new(SECRET, Duration::from_secs(3600));
        let issued = codec.issue(&user()).unwrap();

        let claims = codec.decode(&issued.token).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(claims.remaining().is_some());
    }

    #[test]
    fn test_each_token_has_unique_jti() {
        let codec = JwtCodec::new(SECRET, Duration::from_secs(60));
        let first = codec.issue(&user()).unwrap();
        let second = codec.issue(&user()).unwrap();
        assert_ne!(first.claims.jti, second.claims.jti);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let issuer = JwtCodec::new(SECRET, Duration::from_secs(60));
        let verifier = JwtCodec::new("another-secret-of-16-chars", Duration::from_secs(60));
        let issued = issuer.issue(&user()).unwrap();

        let err = verifier.decode(&issued.token).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(msg) if msg == "Invalid token"));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let codec = JwtCodec::new(SECRET, Duration::from_secs(60));
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "42".to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now - 120,
            exp: now - 60,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &codec.encoding).unwrap();

        let err = codec.decode(&token).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(msg) if msg == "Signature has expired"));
        assert!(claims.remaining().is_none());
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        let codec = JwtCodec::new(SECRET, Duration::from_secs(60));
        assert!(codec.decode("not.a.jwt").is_err());
        assert!(codec.decode("").is_err());
    }
}
