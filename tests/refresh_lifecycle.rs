use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use refresh_lifecycle::configuration::RefreshTokenSettings;
use refresh_lifecycle::error::{AppError, ConfigError, DatabaseError, TokenError};
use refresh_lifecycle::refresh_token::{
    InMemoryRefreshTokenStore, Payload, Principal, RandomTokenGenerator, RefreshLifecycleCoordinator,
    RefreshToken, RefreshTokenStore, TokenGenerator, MAX_TOKEN_ATTEMPTS,
};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

#[derive(Serialize)]
struct User {
    username: String,
}

fn user(name: &str) -> Principal<User> {
    Principal::Authenticated(User {
        username: name.to_string(),
    })
}

/// Store wrapper counting every call made through the trait.
#[derive(Default)]
struct RecordingStore {
    inner: InMemoryRefreshTokenStore,
    calls: AtomicUsize,
    saves: AtomicUsize,
    deletes_won: AtomicUsize,
    deletes_lost: AtomicUsize,
    get_barrier: Option<Barrier>,
    blind_lookups: bool,
}

impl RecordingStore {
    fn new() -> Self {
        Self::default()
    }

    /// Holds every `get` until `parties` callers have reached it.
    fn with_get_barrier(parties: usize) -> Self {
        Self {
            get_barrier: Some(Barrier::new(parties)),
            ..Self::default()
        }
    }

    /// Lookups never find anything, as if another request inserted concurrently.
    fn blind() -> Self {
        Self {
            blind_lookups: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshTokenStore for RecordingStore {
    fn create(&self) -> RefreshToken {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create()
    }

    async fn get(&self, token: &str) -> Result<Option<RefreshToken>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let found = if self.blind_lookups {
            None
        } else {
            self.inner.get(token).await?
        };
        if let Some(barrier) = &self.get_barrier {
            barrier.wait().await;
        }
        Ok(found)
    }

    async fn get_last_for_identity(
        &self,
        identity: &str,
    ) -> Result<Option<RefreshToken>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_last_for_identity(identity).await
    }

    async fn save(&self, token: &RefreshToken) -> Result<(), AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(token).await
    }

    async fn delete(&self, token: &RefreshToken) -> Result<bool, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let deleted = self.inner.delete(token).await?;
        if deleted {
            self.deletes_won.fetch_add(1, Ordering::SeqCst);
        } else {
            self.deletes_lost.fetch_add(1, Ordering::SeqCst);
        }
        Ok(deleted)
    }

    async fn revoke_all_expired(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<RefreshToken>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.revoke_all_expired(before).await
    }
}

/// Hands out queued tokens first, then random ones.
#[derive(Default)]
struct ScriptedGenerator {
    queue: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn push(&self, token: impl Into<String>) {
        self.queue.lock().unwrap().push_back(token.into());
    }

    fn next_token(&self) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RandomTokenGenerator.generate())
    }
}

fn settings() -> RefreshTokenSettings {
    RefreshTokenSettings::default()
}

async fn seed(store: &InMemoryRefreshTokenStore, token: &str, identity: &str) -> RefreshToken {
    let mut entity = RefreshToken::empty();
    entity
        .set_token(token)
        .set_identity(identity)
        .set_valid_until(Utc::now() + Duration::hours(1));
    store.save(&entity).await.expect("Failed to seed token");
    entity
}

// --- Issuance ---

#[tokio::test]
async fn mint_end_to_end_with_expiration() {
    let store = Arc::new(RecordingStore::new());
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(
        store.clone(),
        RefreshTokenSettings {
            ttl_seconds: 600,
            return_expiration: true,
            ..settings()
        },
    )
    .expect("Failed to build coordinator");

    let t0 = Utc::now().timestamp();
    let payload = coordinator
        .handle_authentication_success(&user("alice"), None, Payload::new())
        .await
        .expect("Failed to attach refresh token");
    let t1 = Utc::now().timestamp();

    let token = payload["refresh_token"].as_str().unwrap().to_string();
    let expiration = payload["refresh_token_expiration"].as_i64().unwrap();
    assert!(expiration >= t0 + 600 && expiration <= t1 + 600);

    let stored = store.inner.all().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].token(), token);
    assert_eq!(stored[0].identity(), "alice");
    assert_eq!(store.saves(), 1);
}

#[tokio::test]
async fn expiration_timestamp_matches_ttl() {
    let store = Arc::new(InMemoryRefreshTokenStore::new());
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(
        store,
        RefreshTokenSettings {
            ttl_seconds: 3600,
            return_expiration: true,
            ..settings()
        },
    )
    .expect("Failed to build coordinator");

    let t0 = Utc::now().timestamp();
    let payload = coordinator
        .handle_authentication_success(&user("alice"), None, Payload::new())
        .await
        .unwrap();
    let t1 = Utc::now().timestamp();

    let expiration = payload["refresh_token_expiration"].as_i64().unwrap();
    assert!((t0 + 3600..=t1 + 3600).contains(&expiration));
}

#[tokio::test]
async fn existing_payload_keys_are_preserved() {
    let store = Arc::new(InMemoryRefreshTokenStore::new());
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(store, settings())
        .expect("Failed to build coordinator");
    let mut payload = Payload::new();
    payload.insert("token".to_string(), json!("access.jwt.value"));

    let payload = coordinator
        .handle_authentication_success(&user("alice"), None, payload)
        .await
        .unwrap();

    assert_eq!(payload["token"], json!("access.jwt.value"));
    assert!(payload.contains_key("refresh_token"));
}

#[tokio::test]
async fn custom_parameter_names_and_identity_field() {
    #[derive(Serialize)]
    struct Account {
        email: String,
    }

    let store = Arc::new(InMemoryRefreshTokenStore::new());
    let coordinator = RefreshLifecycleCoordinator::<Account>::from_settings(
        store.clone(),
        RefreshTokenSettings {
            user_identity_field: "email".to_string(),
            token_parameter_name: "rt".to_string(),
            token_expiration_parameter_name: "rt_exp".to_string(),
            return_expiration: true,
            ..settings()
        },
    )
    .expect("Failed to build coordinator");
    let principal = Principal::Authenticated(Account {
        email: "bob@example.com".to_string(),
    });

    let payload = coordinator
        .handle_authentication_success(&principal, None, Payload::new())
        .await
        .unwrap();

    let stored = store.get(payload["rt"].as_str().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.identity(), "bob@example.com");
    assert_eq!(payload["rt_exp"].as_i64().unwrap(), stored.expiration_timestamp());
}

// --- Collisions ---

#[tokio::test]
async fn forced_collisions_are_regenerated_and_tokens_stay_unique() {
    let store = Arc::new(RecordingStore::new());
    let generator = Arc::new(ScriptedGenerator::default());
    let coordinator =
        RefreshLifecycleCoordinator::<User>::from_settings(store.clone(), settings())
            .expect("Failed to build coordinator")
            .with_generator({
                let generator = generator.clone();
                move || generator.next_token()
            });

    let mut previous: Option<String> = None;
    for i in 0..20 {
        if let Some(token) = &previous {
            generator.push(token.clone());
        }
        let payload = coordinator
            .handle_authentication_success(&user(&format!("user{}", i)), None, Payload::new())
            .await
            .unwrap();
        let token = payload["refresh_token"].as_str().unwrap().to_string();
        assert_ne!(Some(&token), previous.as_ref());
        previous = Some(token);
    }

    let tokens: HashSet<String> = store
        .inner
        .all()
        .await
        .iter()
        .map(|token| token.token().to_string())
        .collect();
    assert_eq!(tokens.len(), 20);
    // One extra generation per forced collision.
    assert_eq!(generator.calls.load(Ordering::SeqCst), 20 + 19);
}

#[tokio::test]
async fn invalid_generator_output_is_regenerated() {
    let store = Arc::new(InMemoryRefreshTokenStore::new());
    let generator = Arc::new(ScriptedGenerator::default());
    generator.push("not-a-valid-token");
    generator.push("z".repeat(64));
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(store.clone(), settings())
        .expect("Failed to build coordinator")
        .with_generator(move || generator.next_token());

    let payload = coordinator
        .handle_authentication_success(&user("alice"), None, Payload::new())
        .await
        .unwrap();

    assert_eq!(payload["refresh_token"], json!("z".repeat(64)));
}

#[tokio::test]
async fn retry_exhaustion_is_fatal() {
    let store = Arc::new(InMemoryRefreshTokenStore::new());
    let taken = seed(&store, &"a".repeat(64), "alice").await;
    let taken_token = taken.token().to_string();
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(store.clone(), settings())
        .expect("Failed to build coordinator")
        .with_generator(move || taken_token.clone());

    let result = coordinator
        .handle_authentication_success(&user("bob"), None, Payload::new())
        .await;

    match result {
        Err(AppError::Token(TokenError::CollisionRetriesExhausted(attempts))) => {
            assert_eq!(attempts, MAX_TOKEN_ATTEMPTS)
        }
        other => panic!("Expected retry exhaustion, got {:?}", other),
    }
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn missing_identity_is_a_configuration_error() {
    let store = Arc::new(RecordingStore::new());
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(
        store.clone(),
        RefreshTokenSettings {
            user_identity_field: "nickname".to_string(),
            ..settings()
        },
    )
    .expect("Failed to build coordinator");

    let result = coordinator
        .handle_authentication_success(&user("alice"), None, Payload::new())
        .await;

    assert!(matches!(
        result,
        Err(AppError::Config(ConfigError::MissingRequired(_)))
    ));
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn empty_identity_is_rejected_by_validation() {
    let store = Arc::new(RecordingStore::new());
    let coordinator = RefreshLifecycleCoordinator::<User>::new(
        store.clone(),
        settings(),
        Arc::new(|_: &User| Some(String::new())),
    )
    .expect("Failed to build coordinator");

    let result = coordinator
        .handle_authentication_success(&user("alice"), None, Payload::new())
        .await;

    assert!(matches!(result, Err(AppError::Config(ConfigError::InvalidValue(_)))));
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn invalid_ttl_is_rejected_before_any_issuance() {
    for ttl_seconds in [0, -60, i64::MAX / 2] {
        let store = Arc::new(RecordingStore::new());
        let result = RefreshLifecycleCoordinator::<User>::from_settings(
            store.clone(),
            RefreshTokenSettings {
                ttl_seconds,
                ..settings()
            },
        );

        assert!(
            matches!(result, Err(ConfigError::InvalidValue(_))),
            "ttl {} accepted",
            ttl_seconds
        );
        assert_eq!(store.calls(), 0);
    }
}

#[tokio::test]
async fn duplicate_at_save_time_propagates() {
    let store = Arc::new(RecordingStore::blind());
    let existing = seed(&store.inner, &"d".repeat(64), "alice").await;
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(store.clone(), settings())
        .expect("Failed to build coordinator")
        .with_generator(move || "d".repeat(64));

    let result = coordinator
        .handle_authentication_success(&user("bob"), None, Payload::new())
        .await;

    assert!(matches!(
        result,
        Err(AppError::Database(DatabaseError::UniqueConstraintViolation(_)))
    ));
    let stored = store.inner.all().await;
    assert_eq!(stored, vec![existing]);
}

// --- Reuse and rotation ---

#[tokio::test]
async fn valid_presented_token_is_reused_without_saving() {
    let store = Arc::new(RecordingStore::new());
    let existing = seed(&store.inner, &"r".repeat(64), "alice").await;
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(
        store.clone(),
        RefreshTokenSettings {
            return_expiration: true,
            ..settings()
        },
    )
    .expect("Failed to build coordinator");

    let payload = coordinator
        .handle_authentication_success(&user("alice"), Some(existing.token()), Payload::new())
        .await
        .unwrap();

    assert_eq!(payload["refresh_token"], json!(existing.token()));
    assert_eq!(
        payload["refresh_token_expiration"],
        json!(existing.expiration_timestamp())
    );
    assert_eq!(store.saves(), 0);
    assert_eq!(store.inner.len().await, 1);
}

#[tokio::test]
async fn single_use_token_is_consumed_and_replaced() {
    let store = Arc::new(RecordingStore::new());
    let existing = seed(&store.inner, &"s".repeat(64), "alice").await;
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(
        store.clone(),
        RefreshTokenSettings {
            single_use: true,
            ..settings()
        },
    )
    .expect("Failed to build coordinator");

    let payload = coordinator
        .handle_authentication_success(&user("alice"), Some(existing.token()), Payload::new())
        .await
        .unwrap();

    assert!(store.get(existing.token()).await.unwrap().is_none());
    assert_ne!(payload["refresh_token"], json!(existing.token()));
    assert_eq!(store.deletes_won.load(Ordering::SeqCst), 1);
    assert_eq!(store.inner.len().await, 1);
}

#[tokio::test]
async fn unknown_presented_token_behaves_like_none() {
    let with_unknown = Arc::new(RecordingStore::new());
    let without = Arc::new(RecordingStore::new());
    let config = RefreshTokenSettings {
        return_expiration: true,
        ..settings()
    };
    let a = RefreshLifecycleCoordinator::<User>::from_settings(with_unknown.clone(), config.clone())
        .expect("Failed to build coordinator");
    let b = RefreshLifecycleCoordinator::<User>::from_settings(without.clone(), config)
        .expect("Failed to build coordinator");

    let unknown = "u".repeat(64);
    let first = a
        .handle_authentication_success(&user("alice"), Some(&unknown), Payload::new())
        .await
        .unwrap();
    let second = b
        .handle_authentication_success(&user("alice"), None, Payload::new())
        .await
        .unwrap();

    assert_ne!(first["refresh_token"], json!(unknown));
    assert_eq!(
        first.keys().collect::<Vec<_>>(),
        second.keys().collect::<Vec<_>>()
    );
    assert_eq!(with_unknown.saves(), 1);
    assert_eq!(without.saves(), 1);
    assert_eq!(with_unknown.deletes_won.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_single_use_consumption_has_one_winner() {
    let store = Arc::new(RecordingStore::with_get_barrier(2));
    let existing = seed(&store.inner, &"c".repeat(64), "alice").await;
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(
        store.clone(),
        RefreshTokenSettings {
            single_use: true,
            ..settings()
        },
    )
    .expect("Failed to build coordinator");
    let principal = user("alice");

    let (first, second) = tokio::join!(
        coordinator.handle_authentication_success(&principal, Some(existing.token()), Payload::new()),
        coordinator.handle_authentication_success(&principal, Some(existing.token()), Payload::new()),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(store.deletes_won.load(Ordering::SeqCst), 1);
    assert_eq!(store.deletes_lost.load(Ordering::SeqCst), 1);
    assert_ne!(first["refresh_token"], second["refresh_token"]);
    assert_ne!(first["refresh_token"], json!(existing.token()));
    assert!(store.inner.get(existing.token()).await.unwrap().is_none());
    assert_eq!(store.inner.len().await, 2);
}

// --- Hooks and principals ---

#[tokio::test]
async fn created_hook_can_substitute_entity() {
    let store = Arc::new(InMemoryRefreshTokenStore::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_hook = seen.clone();
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(store.clone(), settings())
        .expect("Failed to build coordinator")
        .with_hook(move |token: RefreshToken| {
            seen_by_hook.lock().unwrap().push(token.identity().to_string());
            token
        })
        .with_hook(|mut token: RefreshToken| {
            token.set_token("h".repeat(64));
            token
        });

    let payload = coordinator
        .handle_authentication_success(&user("alice"), None, Payload::new())
        .await
        .unwrap();

    assert_eq!(payload["refresh_token"], json!("h".repeat(64)));
    assert!(store.get(&"h".repeat(64)).await.unwrap().is_some());
    assert_eq!(*seen.lock().unwrap(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn anonymous_principal_is_a_no_op() {
    let store = Arc::new(RecordingStore::new());
    let coordinator = RefreshLifecycleCoordinator::<User>::from_settings(
        store.clone(),
        RefreshTokenSettings {
            single_use: true,
            return_expiration: true,
            ..settings()
        },
    )
    .expect("Failed to build coordinator");
    let mut payload = Payload::new();
    payload.insert("token".to_string(), json!("access.jwt.value"));
    let before = serde_json::to_vec(&payload).unwrap();

    let after = coordinator
        .handle_authentication_success(&Principal::Anonymous, Some(&"x".repeat(64)), payload)
        .await
        .unwrap();

    assert_eq!(serde_json::to_vec(&after).unwrap(), before);
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn closure_identity_extractor() {
    let store = Arc::new(InMemoryRefreshTokenStore::new());
    let coordinator = RefreshLifecycleCoordinator::<u64>::new(
        store.clone(),
        settings(),
        Arc::new(|id: &u64| Some(format!("user-{}", id))),
    )
    .expect("Failed to build coordinator");

    let payload = coordinator
        .handle_authentication_success(&Principal::Authenticated(7), None, Payload::new())
        .await
        .unwrap();

    let stored = store
        .get_last_for_identity("user-7")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload["refresh_token"], json!(stored.token()));
}
