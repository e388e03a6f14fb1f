use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Length of tokens produced by [`RandomTokenGenerator`].
pub const TOKEN_LENGTH: usize = 64;

/// Source of opaque refresh token strings.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// 64 alphanumeric characters drawn from the thread-local CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect()
    }
}

impl<F> TokenGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}
