/// Refresh token lifecycle on authentication success
///
/// Decides per login whether the presented refresh token is reused,
/// consumed and replaced (single use), or whether a new one is minted,
/// then writes the result into the response payload.
///
/// The payload is only touched once every store operation has succeeded,
/// so a failed request never carries a token that was not persisted.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::entity::RefreshToken;
use super::generator::{RandomTokenGenerator, TokenGenerator};
use super::hooks::RefreshTokenCreatedHook;
use super::identity::{field_path_extractor, IdentityExtractor, Principal};
use super::store::RefreshTokenStore;
use super::validator::{Field, FieldViolation, RefreshTokenValidator};
use crate::configuration::RefreshTokenSettings;
use crate::error::{AppError, ConfigError, ErrorContext, TokenError};

/// Response payload of the authentication-success signal.
pub type Payload = Map<String, Value>;

/// Upper bound on token generation attempts for one mint.
pub const MAX_TOKEN_ATTEMPTS: usize = 10;

/// Per-call switches, defaulting to the coordinator's settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuePolicy {
    pub single_use: bool,
    pub return_expiration: bool,
}

impl From<&RefreshTokenSettings> for IssuePolicy {
    fn from(settings: &RefreshTokenSettings) -> Self {
        Self {
            single_use: settings.single_use,
            return_expiration: settings.return_expiration,
        }
    }
}

pub struct RefreshLifecycleCoordinator<U> {
    store: Arc<dyn RefreshTokenStore>,
    validator: RefreshTokenValidator,
    generator: Arc<dyn TokenGenerator>,
    identity: IdentityExtractor<U>,
    hooks: Vec<Arc<dyn RefreshTokenCreatedHook>>,
    settings: RefreshTokenSettings,
}

impl<U: Serialize + 'static> RefreshLifecycleCoordinator<U> {
    /// Coordinator reading the identity from `settings.user_identity_field`.
    pub fn from_settings(
        store: Arc<dyn RefreshTokenStore>,
        settings: RefreshTokenSettings,
    ) -> Result<Self, ConfigError> {
        let identity = field_path_extractor(&settings.user_identity_field);
        Self::new(store, settings, identity)
    }
}

impl<U> RefreshLifecycleCoordinator<U> {
    /// # Errors
    /// `ConfigError` when `settings` fail [`RefreshTokenSettings::validate`].
    pub fn new(
        store: Arc<dyn RefreshTokenStore>,
        settings: RefreshTokenSettings,
        identity: IdentityExtractor<U>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            validator: RefreshTokenValidator::new(store.clone()),
            store,
            generator: Arc::new(RandomTokenGenerator),
            identity,
            hooks: Vec::new(),
            settings,
        })
    }

    pub fn with_generator(mut self, generator: impl TokenGenerator + 'static) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    /// Registers a hook run on every newly minted token.
    pub fn with_hook(mut self, hook: impl RefreshTokenCreatedHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn settings(&self) -> &RefreshTokenSettings {
        &self.settings
    }

    /// Attaches a refresh token to `payload` using the configured policy.
    pub async fn handle_authentication_success(
        &self,
        principal: &Principal<U>,
        presented_token: Option<&str>,
        payload: Payload,
    ) -> Result<Payload, AppError> {
        let policy = IssuePolicy::from(&self.settings);
        self.handle_with_policy(principal, presented_token, payload, policy)
            .await
    }

    /// Same as [`handle_authentication_success`](Self::handle_authentication_success)
    /// with explicit single-use / expiration switches.
    ///
    /// # Errors
    /// - `AppError::Config` when the principal has no identity under the
    ///   configured field, the minted entity fails a non-token rule, or the
    ///   expiry is out of range
    /// - `AppError::Token` when no unused token string could be generated
    /// - `AppError::Database` for storage failures, including a duplicate
    ///   token detected at save time
    pub async fn handle_with_policy(
        &self,
        principal: &Principal<U>,
        presented_token: Option<&str>,
        payload: Payload,
        policy: IssuePolicy,
    ) -> Result<Payload, AppError> {
        let user = match principal.user() {
            Some(user) => user,
            None => return Ok(payload),
        };

        let identity = (self.identity)(user);
        let mut context = ErrorContext::new("attach_refresh_token");
        if let Some(identity) = &identity {
            context = context.with_identity(identity.clone());
        }

        match self.attach(identity, presented_token, payload, policy).await {
            Ok(payload) => Ok(payload),
            Err(e) => {
                context.log_error(&e);
                Err(e)
            }
        }
    }

    async fn attach(
        &self,
        identity: Option<String>,
        presented_token: Option<&str>,
        mut payload: Payload,
        policy: IssuePolicy,
    ) -> Result<Payload, AppError> {
        let presented_token = presented_token.filter(|token| !token.is_empty());

        let resolved = match presented_token {
            Some(token) => self.store.get(token).await?,
            None => None,
        };

        let reusable = if policy.single_use {
            if let Some(consumed) = &resolved {
                self.consume(consumed).await?;
            }
            None
        } else {
            match resolved {
                Some(existing) if existing.is_valid_now() => Some(existing),
                Some(expired) => {
                    tracing::debug!(token_id = %expired.id(), "Presented refresh token has expired");
                    None
                }
                None => {
                    if presented_token.is_some() {
                        tracing::debug!("Presented refresh token not found");
                    }
                    None
                }
            }
        };

        let token = match reusable {
            Some(existing) => {
                tracing::debug!(token_id = %existing.id(), identity = %existing.identity(), "Reusing refresh token");
                existing
            }
            None => self.mint(identity).await?,
        };

        self.write_payload(&mut payload, &token, policy);
        Ok(payload)
    }

    /// Deletes a presented single-use token. Losing a concurrent race is not
    /// an error; the caller mints its own replacement either way.
    async fn consume(&self, token: &RefreshToken) -> Result<(), AppError> {
        if self.store.delete(token).await? {
            tracing::info!(token_id = %token.id(), identity = %token.identity(), "Single-use refresh token consumed");
        } else {
            tracing::warn!(
                token_id = %token.id(),
                identity = %token.identity(),
                "Single-use refresh token already consumed by a concurrent request"
            );
        }
        Ok(())
    }

    async fn mint(&self, identity: Option<String>) -> Result<RefreshToken, AppError> {
        let identity = identity.ok_or_else(|| {
            ConfigError::MissingRequired(format!(
                "user_identity_field '{}' on the principal",
                self.settings.user_identity_field
            ))
        })?;

        let mut token = self.store.create();
        token
            .set_identity(identity)
            .expire_after(Utc::now(), self.settings.ttl_seconds)?
            .set_token(self.generator.generate());

        let mut attempts = 1;
        loop {
            let violations = self.validator.validate(&token).await?;
            if violations.is_empty() {
                break;
            }

            let (collisions, fatal): (Vec<FieldViolation>, Vec<FieldViolation>) = violations
                .into_iter()
                .partition(|violation| violation.field == Field::Token);

            if !fatal.is_empty() {
                let details: Vec<String> = fatal
                    .iter()
                    .map(|violation| violation.to_string())
                    .collect();
                return Err(ConfigError::InvalidValue(format!(
                    "refresh token entity rejected: {}",
                    details.join(", ")
                ))
                .into());
            }

            if attempts >= MAX_TOKEN_ATTEMPTS {
                return Err(TokenError::CollisionRetriesExhausted(attempts).into());
            }

            tracing::warn!(
                attempt = attempts,
                violation = %collisions[0],
                "Generated refresh token rejected, regenerating"
            );
            token.set_token(self.generator.generate());
            attempts += 1;
        }

        let token = self
            .hooks
            .iter()
            .fold(token, |token, hook| hook.on_refresh_token_created(token));

        self.store.save(&token).await?;

        tracing::info!(
            token_id = %token.id(),
            identity = %token.identity(),
            valid_until = token.expiration_timestamp(),
            "Refresh token issued"
        );
        Ok(token)
    }

    fn write_payload(&self, payload: &mut Payload, token: &RefreshToken, policy: IssuePolicy) {
        payload.insert(
            self.settings.token_parameter_name.clone(),
            Value::String(token.token().to_string()),
        );
        if policy.return_expiration {
            payload.insert(
                self.settings.token_expiration_parameter_name.clone(),
                Value::from(token.expiration_timestamp()),
            );
        }
    }
}
