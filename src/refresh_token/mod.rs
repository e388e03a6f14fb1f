/// Refresh token lifecycle
///
/// Token generation, the refresh token entity and its validation, the
/// storage interface with in-memory and PostgreSQL backends, and the
/// coordinator that attaches refresh tokens on authentication success.

mod coordinator;
mod entity;
mod generator;
mod hooks;
mod identity;
mod postgres;
mod request;
mod store;
mod validator;

pub use coordinator::{IssuePolicy, Payload, RefreshLifecycleCoordinator, MAX_TOKEN_ATTEMPTS};
pub use entity::RefreshToken;
pub use generator::{RandomTokenGenerator, TokenGenerator, TOKEN_LENGTH};
pub use hooks::RefreshTokenCreatedHook;
pub use identity::{field_path_extractor, IdentityExtractor, Principal};
pub use postgres::PgRefreshTokenStore;
pub use request::{attach_refresh_token, extract_refresh_token};
pub use store::{InMemoryRefreshTokenStore, RefreshTokenStore};
pub use validator::{
    validate_identity, validate_token_format, Field, FieldViolation, RefreshTokenValidator,
    MAX_TOKEN_LENGTH, MIN_TOKEN_LENGTH,
};
