//! Refresh token persistence.
//!
//! All changes to persisted refresh tokens go through [`RefreshTokenStore`].
//! Implementations must be atomic per entity:
//!
//! - `save` enforces token uniqueness and fails instead of overwriting
//! - `delete` is conditional, only one concurrent caller observes `true`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::entity::RefreshToken;
use crate::error::{AppError, DatabaseError, ValidationError};

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Empty entity shell to be populated by the caller.
    fn create(&self) -> RefreshToken {
        RefreshToken::empty()
    }

    /// Looks up a token string. Expired entities are returned as well.
    async fn get(&self, token: &str) -> Result<Option<RefreshToken>, AppError>;

    /// The entity of `identity` with the latest expiry.
    async fn get_last_for_identity(&self, identity: &str)
        -> Result<Option<RefreshToken>, AppError>;

    /// Persists a new entity.
    ///
    /// # Errors
    /// `DatabaseError::UniqueConstraintViolation` if the token string is
    /// already held by another entity.
    async fn save(&self, token: &RefreshToken) -> Result<(), AppError>;

    /// Removes the entity. Returns `false` if it was already gone.
    async fn delete(&self, token: &RefreshToken) -> Result<bool, AppError>;

    /// Removes every entity whose expiry is before `before` and returns them.
    async fn revoke_all_expired(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<RefreshToken>, AppError>;
}

/// Process-local store keyed by token string.
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStore {
    tokens: Mutex<HashMap<String, RefreshToken>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.lock().await.is_empty()
    }

    /// Snapshot of every stored entity.
    pub async fn all(&self) -> Vec<RefreshToken> {
        self.tokens.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn get(&self, token: &str) -> Result<Option<RefreshToken>, AppError> {
        Ok(self.tokens.lock().await.get(token).cloned())
    }

    async fn get_last_for_identity(
        &self,
        identity: &str,
    ) -> Result<Option<RefreshToken>, AppError> {
        let tokens = self.tokens.lock().await;
        Ok(tokens
            .values()
            .filter(|stored| stored.identity() == identity)
            .max_by_key(|stored| stored.valid_until())
            .cloned())
    }

    async fn save(&self, token: &RefreshToken) -> Result<(), AppError> {
        if token.valid_until().is_none() {
            return Err(ValidationError::Missing("valid_until".to_string()).into());
        }

        let mut tokens = self.tokens.lock().await;
        if let Some(existing) = tokens.get(token.token()) {
            if existing.id() != token.id() {
                return Err(DatabaseError::UniqueConstraintViolation(
                    "Refresh token already exists".to_string(),
                )
                .into());
            }
        }
        tokens.insert(token.token().to_string(), token.clone());
        Ok(())
    }

    async fn delete(&self, token: &RefreshToken) -> Result<bool, AppError> {
        let mut tokens = self.tokens.lock().await;
        match tokens.get(token.token()) {
            Some(stored) if stored.id() == token.id() => {
                tokens.remove(token.token());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_expired(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<RefreshToken>, AppError> {
        let mut tokens = self.tokens.lock().await;
        let expired: Vec<String> = tokens
            .iter()
            .filter(|(_, stored)| !stored.is_valid(before))
            .map(|(key, _)| key.clone())
            .collect();

        Ok(expired
            .into_iter()
            .filter_map(|key| tokens.remove(&key))
            .collect())
    }
}
