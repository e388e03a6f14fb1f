use super::entity::RefreshToken;

/// Runs after a refresh token has been minted and validated, before it is
/// saved. The returned entity replaces the one passed in.
///
/// Hooks run synchronously in registration order and must not start new
/// authentication flows.
pub trait RefreshTokenCreatedHook: Send + Sync {
    fn on_refresh_token_created(&self, token: RefreshToken) -> RefreshToken;
}

impl<F> RefreshTokenCreatedHook for F
where
    F: Fn(RefreshToken) -> RefreshToken + Send + Sync,
{
    fn on_refresh_token_created(&self, token: RefreshToken) -> RefreshToken {
        self(token)
    }
}
