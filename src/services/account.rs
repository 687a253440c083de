use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::auth::password::{hash_password, verify_password};
use crate::auth::{IssuedToken, JwtCodec};
use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::models::{Credentials, NewUser, Role, SignupParams, User};
use crate::repository::UserRepository;
use crate::store::KeyValueStore;
use crate::validation::validate_signup;

/// Store key prefix of revoked token ids.
pub const DENYLIST_PREFIX: &str = "jwt_denylist:";

const INVALID_CREDENTIALS: &str = "Invalid email or password.";

fn denylist_key(jti: &str) -> String {
    format!("{DENYLIST_PREFIX}{jti}")
}

/// Account lifecycle: signup, login, logout and token verification.
#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserRepository>,
    store: Arc<dyn KeyValueStore>,
    jwt: Arc<JwtCodec>,
    bcrypt_cost: u32,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        store: Arc<dyn KeyValueStore>,
        jwt: Arc<JwtCodec>,
        bcrypt_cost: u32,
    ) -> Self {
        Self {
            users,
            store,
            jwt,
            bcrypt_cost,
        }
    }

    /// Register a regular user.
    #[instrument(skip_all)]
    pub async fn signup(&self, params: SignupParams) -> AppResult<User> {
        let signup = validate_signup(&params).map_err(AppError::Validation)?;

        if self.users.find_by_email(&signup.email).await?.is_some() {
            return Err(AppError::Conflict("Email has already been taken".to_string()));
        }

        let password_hash = hash_password(signup.password, self.bcrypt_cost).await?;
        let user = self
            .users
            .insert(NewUser {
                email: signup.email,
                password_hash,
                role: Role::User,
            })
            .await?;

        info!(user_id = user.id, "User signed up");
        Ok(user)
    }

    /// Check credentials and issue a token.
    ///
    /// Unknown emails and wrong passwords fail identically.
    #[instrument(skip_all)]
    pub async fn login(&self, credentials: Credentials) -> AppResult<(User, IssuedToken)> {
        let invalid = || AppError::Unauthorized(INVALID_CREDENTIALS.to_string());

        let email = credentials
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or_else(invalid)?;
        let password = credentials.password.unwrap_or_default();

        let user = self.users.find_by_email(&email).await?.ok_or_else(invalid)?;
        if !verify_password(password, user.password_hash.clone()).await? {
            return Err(invalid());
        }

        let issued = self.jwt.issue(&user)?;
        info!(user_id = user.id, "User logged in");
        Ok((user, issued))
    }

    /// Revoke the token a request was authenticated with until it expires.
    #[instrument(skip_all, fields(user_id = current.user.id))]
    pub async fn logout(&self, current: &CurrentUser) -> AppResult<()> {
        // An already expired token cannot be replayed, nothing to record
        if let Some(remaining) = current.claims.remaining() {
            self.store
                .set(
                    &denylist_key(&current.claims.jti),
                    current.claims.exp.to_string(),
                    Some(remaining),
                )
                .await?;
        }
        info!("User logged out");
        Ok(())
    }

    /// Resolve a bearer token to its user.
    ///
    /// Fails with `Unauthorized` when the token is invalid, expired, revoked
    /// or its subject no longer exists.
    pub async fn authenticate(&self, token: &str) -> AppResult<CurrentUser> {
        let claims = self.jwt.decode(token)?;

        if self.store.exists(&denylist_key(&claims.jti)).await? {
            return Err(AppError::Unauthorized("Token has been revoked".to_string()));
        }

        let user = self
            .users
            .find_by_id(claims.user_id()?)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))?;

        debug!(user_id = user.id, "Authenticated request");
        Ok(CurrentUser { user, claims })
    }

    /// Make sure an admin account exists for `email`.
    ///
    /// An existing account is promoted and keeps its password; otherwise a
    /// new admin is created with `password`.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> AppResult<User> {
        if let Some(existing) = self.users.find_by_email(email).await? {
            if existing.role == Role::Admin {
                return Ok(existing);
            }
            info!(user_id = existing.id, "Promoting existing account to admin");
            return self.users.set_role(existing.id, Role::Admin).await;
        }

        let signup = validate_signup(&SignupParams {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            password_confirmation: None,
        })
        .map_err(|errors| AppError::ConfigError(format!("Invalid admin seed: {}", errors.join(", "))))?;

        let password_hash = hash_password(signup.password, self.bcrypt_cost).await?;
        let admin = self
            .users
            .insert(NewUser {
                email: signup.email,
                password_hash,
                role: Role::Admin,
            })
            .await?;
        info!(user_id = admin.id, "Seeded admin account");
        Ok(admin)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::repository::MemoryUserRepository;
    use crate::store::MemoryStore;

    const TEST_COST: u32 = 4;

    fn service() -> AccountService {
        AccountService::new(
            Arc::new(MemoryUserRepository::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(JwtCodec::new("test-secret-at-least-16-chars", Duration::from_secs(3600))),
            TEST_COST,
        )
    }

    fn signup_params(email: &str, password: &str, confirmation: &str) -> SignupParams {
        SignupParams {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            password_confirmation: Some(confirmation.to_string()),
        }
    }

    fn credentials(email: &str, password: &str) -> Credentials {
        Credentials {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        }
    }

    #[tokio::test]
    async fn test_signup_then_login() {
        let service = service();
        let user = service
            .signup(signup_params("New@Example.com", "password123", "password123"))
            .await
            .unwrap();
        assert_eq!(user.email, "new@example.com");
        assert_eq!(user.role, Role::User);

        let (logged_in, issued) = service
            .login(credentials("new@example.com", "password123"))
            .await
            .unwrap();
        assert_eq!(logged_in.id, user.id);

        let current = service.authenticate(&issued.token).await.unwrap();
        assert_eq!(current.user.id, user.id);
    }

    #[tokio::test]
    async fn test_signup_duplicate_email() {
        let service = service();
        service
            .signup(signup_params("a@example.com", "password123", "password123"))
            .await
            .unwrap();

        let err = service
            .signup(signup_params("A@example.com", "password123", "password123"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_signup_password_mismatch() {
        let err = service()
            .signup(signup_params("a@example.com", "password123", "different"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(errors)
            if errors == vec!["Password confirmation doesn't match Password".to_string()]));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let service = service();
        service
            .signup(signup_params("a@example.com", "password123", "password123"))
            .await
            .unwrap();

        for creds in [
            credentials("a@example.com", "wrong"),
            credentials("nobody@example.com", "password123"),
            Credentials::default(),
        ] {
            let err = service.login(creds).await.unwrap_err();
            assert!(matches!(err, AppError::Unauthorized(msg) if msg == INVALID_CREDENTIALS));
        }
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let service = service();
        service
            .signup(signup_params("a@example.com", "password123", "password123"))
            .await
            .unwrap();
        let (_, issued) = service
            .login(credentials("a@example.com", "password123"))
            .await
            .unwrap();

        let current = service.authenticate(&issued.token).await.unwrap();
        service.logout(&current).await.unwrap();

        let err = service.authenticate(&issued.token).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(msg) if msg == "Token has been revoked"));

        // A fresh login is unaffected
        let (_, again) = service
            .login(credentials("a@example.com", "password123"))
            .await
            .unwrap();
        assert!(service.authenticate(&again.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_admin_creates_and_promotes() {
        let service = service();
        let admin = service.ensure_admin("root@example.com", "rootpass").await.unwrap();
        assert_eq!(admin.role, Role::Admin);

        // Idempotent
        let again = service.ensure_admin("root@example.com", "ignored").await.unwrap();
        assert_eq!(again.id, admin.id);

        let user = service
            .signup(signup_params("promote@example.com", "password123", "password123"))
            .await
            .unwrap();
        let promoted = service.ensure_admin("promote@example.com", "other").await.unwrap();
        assert_eq!(promoted.id, user.id);
        assert_eq!(promoted.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_ensure_admin_rejects_bad_seed() {
        let err = service().ensure_admin("not-an-email", "x").await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
