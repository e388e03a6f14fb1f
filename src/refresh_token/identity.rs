/// Principal identity extraction
///
/// The coordinator only needs the principal's identity string. It is read
/// through an extractor injected at construction, either a closure or
/// [`field_path_extractor`] which follows the configured
/// `user_identity_field` through the principal's serde representation.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// The principal carried by an authentication-success signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal<U> {
    /// A recognised user; refresh tokens are attached for these only.
    Authenticated(U),
    /// Anything else (API keys, anonymous tokens, ...).
    Anonymous,
}

impl<U> Principal<U> {
    pub fn user(&self) -> Option<&U> {
        match self {
            Principal::Authenticated(user) => Some(user),
            Principal::Anonymous => None,
        }
    }
}

impl<U> From<Option<U>> for Principal<U> {
    fn from(user: Option<U>) -> Self {
        user.map(Principal::Authenticated).unwrap_or(Principal::Anonymous)
    }
}

pub type IdentityExtractor<U> = Arc<dyn Fn(&U) -> Option<String> + Send + Sync>;

/// Extractor reading a dotted path (e.g. `"profile.email"`) from the
/// serialised principal. Strings are used as-is, numbers are formatted.
pub fn field_path_extractor<U>(path: &str) -> IdentityExtractor<U>
where
    U: Serialize + 'static,
{
    let segments: Vec<String> = path
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    Arc::new(move |user: &U| {
        let value = match serde_json::to_value(user) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialise principal for identity extraction");
                return None;
            }
        };
        read_path(&value, &segments)
    })
}

fn read_path(value: &Value, segments: &[String]) -> Option<String> {
    let target = segments
        .iter()
        .try_fold(value, |current, segment| current.get(segment.as_str()))?;

    match target {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
