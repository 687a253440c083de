//! Authentication primitives and the role gate.
//!
//! - [`jwt`]: HS256 token issue/verify
//! - [`password`]: bcrypt hashing on the blocking pool
//! - [`authorize`] / [`require_admin`]: role checks run by handlers after
//!   the caller has been authenticated
//!
//! The request extractor that ties these together lives in
//! [`crate::middleware::auth`].

pub mod jwt;
pub mod password;

use crate::error::{AppError, AppResult};
use crate::models::{Role, User};

pub use jwt::{Claims, IssuedToken, JwtCodec};

/// Allow the request when the user's role is one of `roles`.
pub fn authorize(user: &User, roles: &[Role]) -> AppResult<()> {
    if roles.contains(&user.role) {
        return Ok(());
    }

    let required = roles
        .iter()
        .map(|role| role.as_str())
        .collect::<Vec<_>>()
        .join(" or ");
    Err(AppError::Forbidden(format!("Required role: {required}")))
}

/// Allow the request only for admins.
pub fn require_admin(user: &User) -> AppResult<()> {
    if user.role == Role::Admin {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin access required".to_string()))
    }
}
