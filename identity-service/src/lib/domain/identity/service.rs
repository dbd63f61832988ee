use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auth::AuthenticationError;
use auth::Authenticator;
use auth::PlainToken;
use chrono::Utc;

use crate::domain::identity::events::UserCreatedEvent;
use crate::domain::identity::models::ClientMetadata;
use crate::domain::identity::models::Identity;
use crate::domain::identity::models::LoginCommand;
use crate::domain::identity::models::Permission;
use crate::domain::identity::models::RegisterCommand;
use crate::domain::identity::models::Session;
use crate::domain::identity::models::TokenScope;
use crate::domain::identity::models::User;
use crate::domain::identity::models::UserId;
use crate::domain::identity::tokens::TokenAuthority;
use crate::identity::errors::IdentityError;
use crate::identity::ports::EventPublisher;
use crate::identity::ports::IdentityServicePort;
use crate::identity::ports::IdentityStore;
use crate::identity::ports::SessionCache;

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Domain service implementation for identity operations.
///
/// Every storage round-trip, transactional or not, is bounded by the
/// operation timeout.
pub struct IdentityService<S, EP, C>
where
    S: IdentityStore,
    EP: EventPublisher,
    C: SessionCache,
{
    store: Arc<S>,
    event_publisher: Arc<EP>,
    cache: Arc<C>,
    authenticator: Authenticator,
    tokens: TokenAuthority,
    operation_timeout: Duration,
}

impl<S, EP, C> IdentityService<S, EP, C>
where
    S: IdentityStore,
    EP: EventPublisher,
    C: SessionCache,
{
    /// Create a new identity service with injected dependencies.
    ///
    /// # Arguments
    /// * `store` - Credential and token persistence
    /// * `event_publisher` - Domain event publishing implementation
    /// * `cache` - Resolved-identity cache
    ///
    /// # Returns
    /// Service with default hashing cost, token lifetimes and a 5s timeout
    pub fn new(store: Arc<S>, event_publisher: Arc<EP>, cache: Arc<C>) -> Self {
        Self {
            store,
            event_publisher,
            cache,
            authenticator: Authenticator::new(),
            tokens: TokenAuthority::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn with_token_authority(mut self, tokens: TokenAuthority) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, operation: &'static str, future: F) -> Result<T, IdentityError>
    where
        F: Future<Output = Result<T, IdentityError>>,
    {
        tokio::time::timeout(self.operation_timeout, future)
            .await
            .map_err(|_| {
                tracing::warn!(
                    operation,
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "Storage operation timed out"
                );
                IdentityError::Timeout(operation.to_string())
            })?
    }

    /// Persist a hash produced under the current policy. Failures are logged
    /// and otherwise ignored; the login that triggered it already succeeded.
    async fn upgrade_password_hash(&self, user: &User, password_hash: &str) {
        let result = self
            .bounded(
                "update_password_hash",
                self.store
                    .update_password_hash(&user.id, password_hash, user.version),
            )
            .await;

        match result {
            Ok(()) => tracing::info!(user_id = %user.id, "Password hash upgraded"),
            Err(e) => tracing::warn!(
                user_id = %user.id,
                error = %e,
                "Failed to persist upgraded password hash"
            ),
        }
    }

    /// Mint a pair and store it, deleting the previous one first when asked.
    ///
    /// A concurrent login for the same user may win the unique constraint;
    /// the loser returns the winner's pair.
    async fn store_new_session(
        &self,
        user: &User,
        client: ClientMetadata,
        replace_existing: bool,
    ) -> Result<Session, IdentityError> {
        let (credentials, pair) = self.tokens.issue_session_pair(&user.id, client)?;

        let result = self
            .bounded("store_session_pair", async {
                let mut transaction = self.store.begin().await?;
                if replace_existing {
                    transaction.delete_session_pair(&user.id).await?;
                }
                transaction.insert_session_pair(&pair).await?;
                transaction.commit().await
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(user_id = %user.id, "Session pair issued");
                Ok(Session {
                    pair,
                    credentials: Some(credentials),
                })
            }
            Err(IdentityError::Conflict(_)) | Err(IdentityError::NotFound(_)) => {
                tracing::debug!(user_id = %user.id, "Lost session pair race, reading winner");
                let winner = self
                    .bounded("find_session_pair", self.store.find_session_pair(&user.id))
                    .await?;

                match winner {
                    Some(pair) if pair.is_valid_at(Utc::now()) => Ok(Session {
                        pair,
                        credentials: None,
                    }),
                    _ => Err(IdentityError::Conflict(format!(
                        "session pair for user {}",
                        user.id
                    ))),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<S, EP, C> IdentityServicePort for IdentityService<S, EP, C>
where
    S: IdentityStore,
    EP: EventPublisher,
    C: SessionCache,
{
    async fn register(&self, command: RegisterCommand) -> Result<String, IdentityError> {
        let password_hash = self
            .authenticator
            .hash_password(command.password.as_str())?;

        let user = User::register(command.username, command.email, password_hash);
        let (activation_token, record) = self.tokens.issue_activation(&user.id)?;

        self.bounded("register", async {
            let mut transaction = self.store.begin().await?;
            transaction.insert_user(&user).await?;
            transaction.insert_token(&record).await?;
            transaction.commit().await
        })
        .await?;

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");

        let event = UserCreatedEvent::new(&user, activation_token.clone());
        if let Err(e) = self.event_publisher.publish_user_created(&event).await {
            tracing::error!(
                user_id = %user.id,
                error = %e,
                "Failed to publish UserCreated event"
            );
            return Err(IdentityError::EventPublishing {
                user_id: user.id.to_string(),
                source: e,
            });
        }

        Ok(activation_token.into_string())
    }

    async fn activate(&self, token: &str) -> Result<User, IdentityError> {
        let mut user = self
            .bounded(
                "resolve_activation_token",
                self.tokens
                    .resolve(self.store.as_ref(), TokenScope::Activation, token),
            )
            .await?;

        self.bounded("activate", async {
            let mut transaction = self.store.begin().await?;
            transaction.activate_user(&user.id, user.version).await?;
            transaction
                .delete_tokens(&user.id, TokenScope::Activation)
                .await?;
            transaction
                .grant_permission(&user.id, Permission::BlogWrite)
                .await?;
            transaction.commit().await
        })
        .await?;

        user.activated = true;
        user.version += 1;

        tracing::info!(user_id = %user.id, "User activated");

        Ok(user)
    }

    async fn login(&self, command: LoginCommand) -> Result<Session, IdentityError> {
        let user = self
            .bounded("find_by_username", self.store.find_by_username(&command.username))
            .await?;

        let verification = match &user {
            Some(user) => self
                .authenticator
                .authenticate(command.password.as_str(), &user.password_hash),
            None => Err(self.authenticator.reject_unknown(command.password.as_str())),
        }
        .map_err(|e| match e {
            AuthenticationError::InvalidCredentials => IdentityError::AuthenticationFailure,
            AuthenticationError::PasswordError(err) => IdentityError::Password(err),
        })?;
        let Some(user) = user else {
            return Err(IdentityError::AuthenticationFailure);
        };

        if !user.activated {
            return Err(IdentityError::InactiveAccount);
        }

        if let Some(upgraded_hash) = verification.upgraded_hash {
            self.upgrade_password_hash(&user, &upgraded_hash).await;
        }

        let existing = self
            .bounded("find_session_pair", self.store.find_session_pair(&user.id))
            .await?;

        match existing {
            Some(pair) if pair.is_valid_at(Utc::now()) => {
                tracing::debug!(user_id = %user.id, "Returning existing session pair");
                Ok(Session {
                    pair,
                    credentials: None,
                })
            }
            Some(_) => self.store_new_session(&user, command.client, true).await,
            None => self.store_new_session(&user, command.client, false).await,
        }
    }

    async fn resolve_access_token(&self, token: &str) -> Result<Identity, IdentityError> {
        let token = PlainToken::parse(token)?;
        let key = token.hash();

        if let Some(identity) = self.cache.get(&key) {
            return Ok(identity);
        }

        let resolved = self
            .bounded(
                "resolve_access_token",
                self.tokens
                    .resolve_access_token(self.store.as_ref(), &token),
            )
            .await?;

        if let Ok(remaining) = (resolved.access_expiry - Utc::now()).to_std() {
            self.cache.set(key, resolved.identity.clone(), remaining);
        }

        Ok(resolved.identity)
    }

    async fn logout(&self, user_id: &UserId) -> Result<(), IdentityError> {
        self.bounded("logout", async {
            let mut transaction = self.store.begin().await?;
            transaction.delete_session_pair(user_id).await?;
            transaction.commit().await
        })
        .await?;

        self.cache.remove_user(user_id);
        tracing::info!(user_id = %user_id, "User logged out");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use auth::HashPolicy;
    use auth::TokenHash;
    use chrono::DateTime;
    use mockall::mock;

    use super::*;
    use crate::domain::identity::models::ResolvedAccess;
    use crate::domain::identity::models::ScopedToken;
    use crate::domain::identity::models::SessionPair;
    use crate::domain::identity::models::Username;
    use crate::domain::identity::tokens::TokenLifetimes;
    use crate::identity::errors::EventPublisherError;
    use crate::identity::ports::CredentialStore;
    use crate::identity::ports::StoreTransaction;
    use crate::identity::ports::TokenStore;
    use crate::outbound::cache::InMemorySessionCache;
    use crate::outbound::repositories::memory::InMemoryIdentityStore;

    mock! {
        pub TestEventPublisher {}

        #[async_trait]
        impl EventPublisher for TestEventPublisher {
            async fn publish_user_created(&self, event: &UserCreatedEvent) -> Result<(), EventPublisherError>;
        }
    }

    type TestService = IdentityService<InMemoryIdentityStore, MockTestEventPublisher, InMemorySessionCache>;

    const PASSWORD: &str = "Sup3r#secret";

    fn cheap_authenticator(iterations: u32) -> Authenticator {
        Authenticator::with_policy(HashPolicy {
            memory_cost_kib: 8 * 1024,
            iterations,
            parallelism: 1,
        })
        .unwrap()
    }

    fn accepting_publisher() -> MockTestEventPublisher {
        let mut publisher = MockTestEventPublisher::new();
        publisher
            .expect_publish_user_created()
            .returning(|_| Ok(()));
        publisher
    }

    fn service_with(
        store: Arc<InMemoryIdentityStore>,
        publisher: MockTestEventPublisher,
    ) -> (TestService, Arc<InMemorySessionCache>) {
        let cache = Arc::new(InMemorySessionCache::new());
        let service = IdentityService::new(store, Arc::new(publisher), Arc::clone(&cache))
            .with_authenticator(cheap_authenticator(1));
        (service, cache)
    }

    fn register_command(username: &str, email: &str) -> RegisterCommand {
        RegisterCommand::parse(username.to_string(), email.to_string(), PASSWORD.to_string())
            .unwrap()
    }

    fn login_command(username: &str, password: &str) -> LoginCommand {
        LoginCommand::parse(
            username.to_string(),
            password.to_string(),
            ClientMetadata::default(),
        )
        .unwrap()
    }

    async fn registered_and_activated(service: &TestService, username: &str) -> User {
        let token = service
            .register(register_command(username, &format!("{}@example.com", username)))
            .await
            .unwrap();
        service.activate(&token).await.unwrap()
    }

    #[tokio::test]
    async fn test_register_stores_unactivated_user_and_publishes_token() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let mut publisher = MockTestEventPublisher::new();
        publisher
            .expect_publish_user_created()
            .withf(|event| {
                event.email == "alice@example.com"
                    && event.activation_token.as_str().len() == auth::TOKEN_LENGTH
            })
            .times(1)
            .returning(|_| Ok(()));
        let (service, _) = service_with(Arc::clone(&store), publisher);

        let token = service
            .register(register_command("alice", "alice@example.com"))
            .await
            .unwrap();

        assert_eq!(token.len(), auth::TOKEN_LENGTH);
        let user = store
            .find_by_username(&Username::new("alice".to_string()).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(!user.activated);
        assert!(user.password_hash.starts_with("$argon2id$"));
        assert_eq!(store.token_count(&user.id, TokenScope::Activation), 1);
    }

    #[tokio::test]
    async fn test_register_duplicate_username_is_rejected() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(store, accepting_publisher());

        service
            .register(register_command("alice", "alice@example.com"))
            .await
            .unwrap();
        let result = service
            .register(register_command("alice", "other@example.com"))
            .await;

        assert!(matches!(result, Err(IdentityError::UsernameAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_register_duplicate_email_is_rejected() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(store, accepting_publisher());

        service
            .register(register_command("alice", "alice@example.com"))
            .await
            .unwrap();
        let result = service
            .register(register_command("bob", "alice@example.com"))
            .await;

        assert!(matches!(result, Err(IdentityError::EmailAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_register_publish_failure_keeps_user() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let mut publisher = MockTestEventPublisher::new();
        publisher
            .expect_publish_user_created()
            .times(1)
            .returning(|_| Err(EventPublisherError::PublishFailed("broker down".to_string())));
        let (service, _) = service_with(Arc::clone(&store), publisher);

        let result = service
            .register(register_command("alice", "alice@example.com"))
            .await;

        assert!(matches!(result, Err(IdentityError::EventPublishing { .. })));
        let stored = store
            .find_by_username(&Username::new("alice".to_string()).unwrap())
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_activate_consumes_token_and_grants_permission() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(Arc::clone(&store), accepting_publisher());

        let token = service
            .register(register_command("alice", "alice@example.com"))
            .await
            .unwrap();
        let user = service.activate(&token).await.unwrap();

        assert!(user.activated);
        assert_eq!(user.version, 2);
        assert_eq!(store.token_count(&user.id, TokenScope::Activation), 0);
        assert_eq!(store.permissions(&user.id), vec![Permission::BlogWrite]);

        let again = service.activate(&token).await;
        assert!(matches!(again, Err(IdentityError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_activate_with_malformed_token_is_validation_error() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(store, accepting_publisher());

        let result = service.activate("abc").await;

        assert!(matches!(result, Err(IdentityError::Validation(_))));
    }

    #[tokio::test]
    async fn test_concurrent_activation_has_single_winner() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(store, accepting_publisher());
        let service = Arc::new(service);

        let token = service
            .register(register_command("alice", "alice@example.com"))
            .await
            .unwrap();

        let first = {
            let service = Arc::clone(&service);
            let token = token.clone();
            tokio::spawn(async move { service.activate(&token).await })
        };
        let second = {
            let service = Arc::clone(&service);
            let token = token.clone();
            tokio::spawn(async move { service.activate(&token).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(IdentityError::NotFound(_)) | Err(IdentityError::Conflict(_))
        )));
    }

    #[tokio::test]
    async fn test_login_unknown_user_and_wrong_password_look_the_same() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(store, accepting_publisher());
        registered_and_activated(&service, "alice").await;

        let unknown = service.login(login_command("mallory", PASSWORD)).await;
        let wrong = service.login(login_command("alice", "Wr0ng#pass")).await;

        assert!(matches!(unknown, Err(IdentityError::AuthenticationFailure)));
        assert!(matches!(wrong, Err(IdentityError::AuthenticationFailure)));
    }

    #[tokio::test]
    async fn test_login_unknown_user_still_spends_a_verification() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let cache = Arc::new(InMemorySessionCache::new());
        let service = IdentityService::new(store, Arc::new(accepting_publisher()), cache)
            .with_authenticator(
                Authenticator::with_policy(HashPolicy {
                    memory_cost_kib: 16 * 1024,
                    iterations: 3,
                    parallelism: 1,
                })
                .unwrap(),
            );
        registered_and_activated(&service, "alice").await;

        let started = std::time::Instant::now();
        let wrong = service.login(login_command("alice", "Wr0ng#pass")).await;
        let wrong_password = started.elapsed();

        let started = std::time::Instant::now();
        let unknown = service.login(login_command("mallory", "Wr0ng#pass")).await;
        let unknown_user = started.elapsed();

        assert!(matches!(wrong, Err(IdentityError::AuthenticationFailure)));
        assert!(matches!(unknown, Err(IdentityError::AuthenticationFailure)));
        assert!(
            unknown_user * 4 >= wrong_password,
            "unknown user answered in {:?}, wrong password in {:?}",
            unknown_user,
            wrong_password
        );
    }

    #[tokio::test]
    async fn test_login_requires_activation() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(store, accepting_publisher());
        service
            .register(register_command("alice", "alice@example.com"))
            .await
            .unwrap();

        let result = service.login(login_command("alice", PASSWORD)).await;

        assert!(matches!(result, Err(IdentityError::InactiveAccount)));
    }

    #[tokio::test]
    async fn test_login_is_idempotent_while_pair_is_valid() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(store, accepting_publisher());
        registered_and_activated(&service, "alice").await;

        let first = service.login(login_command("alice", PASSWORD)).await.unwrap();
        let second = service.login(login_command("alice", PASSWORD)).await.unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.pair, second.pair);
    }

    #[tokio::test]
    async fn test_login_replaces_expired_pair() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(Arc::clone(&store), accepting_publisher());
        let user = registered_and_activated(&service, "alice").await;

        let first = service.login(login_command("alice", PASSWORD)).await.unwrap();
        store.expire_session_pair(&user.id);

        let second = service.login(login_command("alice", PASSWORD)).await.unwrap();

        assert!(second.is_new());
        assert_ne!(first.pair.access_hash, second.pair.access_hash);
        let stored = store.find_session_pair(&user.id).await.unwrap().unwrap();
        assert_eq!(stored, second.pair);
    }

    #[tokio::test]
    async fn test_login_upgrades_stale_password_hash() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(Arc::clone(&store), accepting_publisher());
        let user = registered_and_activated(&service, "alice").await;

        let stronger = IdentityService::new(
            Arc::clone(&store),
            Arc::new(accepting_publisher()),
            Arc::new(InMemorySessionCache::new()),
        )
        .with_authenticator(cheap_authenticator(2));

        stronger.login(login_command("alice", PASSWORD)).await.unwrap();

        let reloaded = store
            .find_by_username(&user.username)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(reloaded.password_hash, user.password_hash);
        assert!(reloaded.password_hash.contains("t=2"));
        assert_eq!(reloaded.version, user.version + 1);
    }

    #[tokio::test]
    async fn test_resolve_access_token_returns_identity_and_caches_it() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, cache) = service_with(store, accepting_publisher());
        let user = registered_and_activated(&service, "alice").await;

        let session = service.login(login_command("alice", PASSWORD)).await.unwrap();
        let access = session.credentials.unwrap().access_token;

        let identity = service.resolve_access_token(access.as_str()).await.unwrap();

        assert_eq!(identity.user_id, user.id);
        assert!(identity.activated);
        assert!(identity.has_permission(Permission::BlogWrite));
        assert_eq!(cache.get(&access.hash()), Some(identity));
    }

    #[tokio::test]
    async fn test_resolve_rejects_malformed_and_unknown_tokens() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(store, accepting_publisher());

        let malformed = service.resolve_access_token("short").await;
        let unknown = service
            .resolve_access_token(PlainToken::generate().unwrap().as_str())
            .await;

        assert!(matches!(malformed, Err(IdentityError::Validation(_))));
        assert!(matches!(unknown, Err(IdentityError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_expired_access_token_is_not_found_from_cache_or_store() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, cache) = service_with(store, accepting_publisher());
        let service = service.with_token_authority(TokenAuthority::new(TokenLifetimes {
            access: chrono::Duration::milliseconds(50),
            refresh: chrono::Duration::hours(1),
            ..TokenLifetimes::default()
        }));
        registered_and_activated(&service, "alice").await;

        let session = service.login(login_command("alice", PASSWORD)).await.unwrap();
        let access = session.credentials.unwrap().access_token;
        service.resolve_access_token(access.as_str()).await.unwrap();
        assert!(cache.get(&access.hash()).is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get(&access.hash()).is_none());
        let expired = service.resolve_access_token(access.as_str()).await;
        assert!(matches!(expired, Err(IdentityError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_logout_deletes_pair_and_evicts_cache() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, cache) = service_with(Arc::clone(&store), accepting_publisher());
        let user = registered_and_activated(&service, "alice").await;

        let session = service.login(login_command("alice", PASSWORD)).await.unwrap();
        let access = session.credentials.unwrap().access_token;
        service.resolve_access_token(access.as_str()).await.unwrap();

        service.logout(&user.id).await.unwrap();

        assert!(store.find_session_pair(&user.id).await.unwrap().is_none());
        assert!(cache.get(&access.hash()).is_none());
        let after = service.resolve_access_token(access.as_str()).await;
        assert!(matches!(after, Err(IdentityError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_logout_without_session_is_not_found() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let (service, _) = service_with(store, accepting_publisher());
        let user = registered_and_activated(&service, "alice").await;

        let result = service.logout(&user.id).await;

        assert!(matches!(result, Err(IdentityError::NotFound(_))));
    }

    /// Store whose username lookup never finishes in time.
    struct StalledStore;

    #[async_trait]
    impl CredentialStore for StalledStore {
        async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IdentityError> {
            Err(IdentityError::Unknown("not used".to_string()))
        }

        async fn find_by_username(&self, _: &Username) -> Result<Option<User>, IdentityError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn update_password_hash(&self, _: &UserId, _: &str, _: i32) -> Result<(), IdentityError> {
            Ok(())
        }
    }

    #[async_trait]
    impl TokenStore for StalledStore {
        async fn find_user_by_token(
            &self,
            _: TokenScope,
            _: &TokenHash,
            _: DateTime<Utc>,
        ) -> Result<Option<User>, IdentityError> {
            Ok(None)
        }

        async fn find_session_pair(&self, _: &UserId) -> Result<Option<SessionPair>, IdentityError> {
            Ok(None)
        }

        async fn find_identity_by_access_token(
            &self,
            _: &TokenHash,
            _: DateTime<Utc>,
        ) -> Result<Option<ResolvedAccess>, IdentityError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_storage_calls_are_bounded_by_timeout() {
        let service = IdentityService::new(
            Arc::new(StalledStore),
            Arc::new(MockTestEventPublisher::new()),
            Arc::new(InMemorySessionCache::new()),
        )
        .with_operation_timeout(Duration::from_millis(50));

        let result = service.login(login_command("alice", PASSWORD)).await;

        assert!(matches!(result, Err(IdentityError::Timeout(_))));
    }

    /// In-memory store whose transactions fail at `grant_permission`.
    struct GrantFailingStore {
        inner: InMemoryIdentityStore,
    }

    struct GrantFailingTransaction {
        inner: Box<dyn StoreTransaction>,
    }

    #[async_trait]
    impl StoreTransaction for GrantFailingTransaction {
        async fn insert_user(&mut self, user: &User) -> Result<(), IdentityError> {
            self.inner.insert_user(user).await
        }

        async fn insert_token(&mut self, token: &ScopedToken) -> Result<(), IdentityError> {
            self.inner.insert_token(token).await
        }

        async fn activate_user(&mut self, user_id: &UserId, version: i32) -> Result<(), IdentityError> {
            self.inner.activate_user(user_id, version).await
        }

        async fn delete_tokens(&mut self, user_id: &UserId, scope: TokenScope) -> Result<u64, IdentityError> {
            self.inner.delete_tokens(user_id, scope).await
        }

        async fn grant_permission(&mut self, _: &UserId, _: Permission) -> Result<(), IdentityError> {
            Err(IdentityError::DatabaseError("permissions table unavailable".to_string()))
        }

        async fn insert_session_pair(&mut self, pair: &SessionPair) -> Result<(), IdentityError> {
            self.inner.insert_session_pair(pair).await
        }

        async fn delete_session_pair(&mut self, user_id: &UserId) -> Result<(), IdentityError> {
            self.inner.delete_session_pair(user_id).await
        }

        async fn commit(self: Box<Self>) -> Result<(), IdentityError> {
            self.inner.commit().await
        }
    }

    #[async_trait]
    impl CredentialStore for GrantFailingStore {
        async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IdentityError> {
            Ok(Box::new(GrantFailingTransaction {
                inner: self.inner.begin().await?,
            }))
        }

        async fn find_by_username(&self, username: &Username) -> Result<Option<User>, IdentityError> {
            self.inner.find_by_username(username).await
        }

        async fn update_password_hash(&self, user_id: &UserId, hash: &str, version: i32) -> Result<(), IdentityError> {
            self.inner.update_password_hash(user_id, hash, version).await
        }
    }

    #[async_trait]
    impl TokenStore for GrantFailingStore {
        async fn find_user_by_token(
            &self,
            scope: TokenScope,
            hash: &TokenHash,
            now: DateTime<Utc>,
        ) -> Result<Option<User>, IdentityError> {
            self.inner.find_user_by_token(scope, hash, now).await
        }

        async fn find_session_pair(&self, user_id: &UserId) -> Result<Option<SessionPair>, IdentityError> {
            self.inner.find_session_pair(user_id).await
        }

        async fn find_identity_by_access_token(
            &self,
            hash: &TokenHash,
            now: DateTime<Utc>,
        ) -> Result<Option<ResolvedAccess>, IdentityError> {
            self.inner.find_identity_by_access_token(hash, now).await
        }
    }

    #[tokio::test]
    async fn test_failed_activation_step_rolls_back_every_write() {
        let inner = InMemoryIdentityStore::new();
        let service = IdentityService::new(
            Arc::new(GrantFailingStore {
                inner: inner.clone(),
            }),
            Arc::new(accepting_publisher()),
            Arc::new(InMemorySessionCache::new()),
        )
        .with_authenticator(cheap_authenticator(1));

        let token = service
            .register(register_command("alice", "alice@example.com"))
            .await
            .unwrap();
        let result = service.activate(&token).await;

        assert!(matches!(result, Err(IdentityError::DatabaseError(_))));
        let user = inner
            .find_by_username(&Username::new("alice".to_string()).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(!user.activated);
        assert_eq!(user.version, 1);
        assert!(inner.permissions(&user.id).is_empty());
        let hash = PlainToken::parse(&token).unwrap().hash();
        let still_valid = inner
            .find_user_by_token(TokenScope::Activation, &hash, Utc::now())
            .await
            .unwrap();
        assert_eq!(still_valid.map(|u| u.id), Some(user.id));
    }
}
