use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ConfigError;

/// A refresh token record.
///
/// Built empty by [`RefreshTokenStore::create`](super::RefreshTokenStore::create),
/// populated once during issuance and never edited after it has been saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    id: Uuid,
    token: String,
    identity: String,
    valid_until: Option<DateTime<Utc>>,
}

impl Default for RefreshToken {
    fn default() -> Self {
        Self::empty()
    }
}

impl RefreshToken {
    /// An empty shell with a fresh row id.
    pub fn empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            token: String::new(),
            identity: String::new(),
            valid_until: None,
        }
    }

    /// Rebuilds a persisted record (used by storage backends).
    pub fn from_parts(
        id: Uuid,
        token: String,
        identity: String,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            token,
            identity,
            valid_until: Some(valid_until),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    pub fn set_token(&mut self, token: impl Into<String>) -> &mut Self {
        self.token = token.into();
        self
    }

    pub fn set_identity(&mut self, identity: impl Into<String>) -> &mut Self {
        self.identity = identity.into();
        self
    }

    pub fn set_valid_until(&mut self, valid_until: DateTime<Utc>) -> &mut Self {
        self.valid_until = Some(valid_until);
        self
    }

    /// Sets the expiry `ttl_seconds` after `now`.
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` when the expiry is not representable.
    pub fn expire_after(
        &mut self,
        now: DateTime<Utc>,
        ttl_seconds: i64,
    ) -> Result<&mut Self, ConfigError> {
        let valid_until = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "refresh_token.ttl_seconds {} is out of range",
                    ttl_seconds
                ))
            })?;
        Ok(self.set_valid_until(valid_until))
    }

    /// Unix timestamp of the expiry, `0` when unset.
    pub fn expiration_timestamp(&self) -> i64 {
        self.valid_until.map(|valid| valid.timestamp()).unwrap_or(0)
    }

    /// Usable while `now < valid_until`. A token without expiry is never valid.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map(|valid| now < valid).unwrap_or(false)
    }

    pub fn is_valid_now(&self) -> bool {
        self.is_valid(Utc::now())
    }
}

impl fmt::Display for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}
