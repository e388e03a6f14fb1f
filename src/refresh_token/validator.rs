/// Refresh token validation
///
/// Checks an entity before it is persisted:
/// 1. Token shape: 32 to 128 ASCII alphanumeric characters
/// 2. Token uniqueness against the store
/// 3. Identity present
/// 4. Expiry set

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

use super::entity::RefreshToken;
use super::store::RefreshTokenStore;
use crate::error::{AppError, ValidationError};

pub const MIN_TOKEN_LENGTH: usize = 32;
pub const MAX_TOKEN_LENGTH: usize = 128;
const MAX_IDENTITY_LENGTH: usize = 255;

lazy_static! {
    static ref TOKEN_REGEX: Regex = Regex::new(r"^[A-Za-z0-9]+$").unwrap();
}

/// Entity field a violation is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Token,
    Identity,
    ValidUntil,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Token => f.write_str("token"),
            Field::Identity => f.write_str("identity"),
            Field::ValidUntil => f.write_str("valid_until"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: Field,
    pub error: ValidationError,
}

impl FieldViolation {
    pub fn new(field: Field, error: ValidationError) -> Self {
        Self { field, error }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Validates the token string shape without consulting storage.
pub fn validate_token_format(token: &str) -> Result<(), ValidationError> {
    let field = Field::Token.to_string();

    if token.is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    if token.len() < MIN_TOKEN_LENGTH {
        return Err(ValidationError::TooShort(field, MIN_TOKEN_LENGTH));
    }
    if token.len() > MAX_TOKEN_LENGTH {
        return Err(ValidationError::TooLong(field, MAX_TOKEN_LENGTH));
    }
    if !TOKEN_REGEX.is_match(token) {
        return Err(ValidationError::InvalidFormat(field));
    }
    Ok(())
}

pub fn validate_identity(identity: &str) -> Result<(), ValidationError> {
    let field = Field::Identity.to_string();

    if identity.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    if identity.len() > MAX_IDENTITY_LENGTH {
        return Err(ValidationError::TooLong(field, MAX_IDENTITY_LENGTH));
    }
    Ok(())
}

/// Validates entities against their own invariants and the store contents.
#[derive(Clone)]
pub struct RefreshTokenValidator {
    store: Arc<dyn RefreshTokenStore>,
}

impl RefreshTokenValidator {
    pub fn new(store: Arc<dyn RefreshTokenStore>) -> Self {
        Self { store }
    }

    /// Returns every violation found; an empty list means the entity may be saved.
    ///
    /// # Errors
    /// Only storage failures are errors; invalid entities are reported as violations.
    pub async fn validate(&self, token: &RefreshToken) -> Result<Vec<FieldViolation>, AppError> {
        let mut violations = Vec::new();

        match validate_token_format(token.token()) {
            Ok(()) => {
                if let Some(existing) = self.store.get(token.token()).await? {
                    if existing.id() != token.id() {
                        violations.push(FieldViolation::new(
                            Field::Token,
                            ValidationError::AlreadyInUse(Field::Token.to_string()),
                        ));
                    }
                }
            }
            Err(e) => violations.push(FieldViolation::new(Field::Token, e)),
        }

        if let Err(e) = validate_identity(token.identity()) {
            violations.push(FieldViolation::new(Field::Identity, e));
        }

        if token.valid_until().is_none() {
            violations.push(FieldViolation::new(
                Field::ValidUntil,
                ValidationError::Missing(Field::ValidUntil.to_string()),
            ));
        }

        Ok(violations)
    }
}
