use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::UserRepository;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, Role, User};

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<i64, User>,
    last_id: i64,
}

/// Accounts held in a `BTreeMap` keyed by id. Emails are compared lower-cased.
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    inner: RwLock<Inner>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let email = email.to_lowercase();
        let inner = self.inner.read().await;
        Ok(inner.rows.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn insert(&self, user: NewUser) -> AppResult<User> {
        let email = user.email.to_lowercase();
        let mut inner = self.inner.write().await;
        if inner.rows.values().any(|u| u.email == email) {
            return Err(AppError::Conflict("Email has already been taken".to_string()));
        }

        inner.last_id += 1;
        let user = User {
            id: inner.last_id,
            email,
            password_hash: user.password_hash,
            role: user.role,
            created_at: Utc::now(),
        };
        inner.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_role(&self, id: i64, role: Role) -> AppResult<User> {
        let mut inner = self.inner.write().await;
        let user = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Couldn't find User with 'id'={id}")))?;
        user.role = role;
        Ok(user.clone())
    }
}
