use std::time::Duration;

use async_trait::async_trait;
use auth::TokenHash;
use chrono::DateTime;
use chrono::Utc;

use crate::domain::identity::events::UserCreatedEvent;
use crate::domain::identity::models::Identity;
use crate::domain::identity::models::LoginCommand;
use crate::domain::identity::models::Permission;
use crate::domain::identity::models::RegisterCommand;
use crate::domain::identity::models::ResolvedAccess;
use crate::domain::identity::models::ScopedToken;
use crate::domain::identity::models::Session;
use crate::domain::identity::models::SessionPair;
use crate::domain::identity::models::TokenScope;
use crate::domain::identity::models::User;
use crate::domain::identity::models::UserId;
use crate::domain::identity::models::Username;
use crate::identity::errors::EventPublisherError;
use crate::identity::errors::IdentityError;

/// Port for identity domain service operations.
#[async_trait]
pub trait IdentityServicePort: Send + Sync + 'static {
    /// Register an unactivated account and hand out its activation token.
    ///
    /// # Arguments
    /// * `command` - Validated username, email and password
    ///
    /// # Returns
    /// Plaintext activation token
    ///
    /// # Errors
    /// * `UsernameAlreadyExists` / `EmailAlreadyExists` - Uniqueness violated
    /// * `EventPublishing` - Account stored but the event was not published
    /// * `Timeout` / `DatabaseError` - Storage failed
    async fn register(&self, command: RegisterCommand) -> Result<String, IdentityError>;

    /// Consume an activation token: activate the account, drop its activation
    /// tokens and grant the base permission in one transaction.
    ///
    /// # Errors
    /// * `Validation` - Token has the wrong shape
    /// * `NotFound` - Token unknown, expired or already consumed
    /// * `Conflict` - Account changed concurrently
    async fn activate(&self, token: &str) -> Result<User, IdentityError>;

    /// Authenticate and return the user's session pair.
    ///
    /// # Errors
    /// * `AuthenticationFailure` - Unknown username or wrong password
    /// * `InactiveAccount` - Account never activated
    async fn login(&self, command: LoginCommand) -> Result<Session, IdentityError>;

    /// Resolve a presented access token to the identity behind it.
    ///
    /// # Errors
    /// * `Validation` - Token has the wrong shape
    /// * `NotFound` - Token unknown or expired
    async fn resolve_access_token(&self, token: &str) -> Result<Identity, IdentityError>;

    /// Delete the user's session pair and evict it from the cache.
    ///
    /// # Errors
    /// * `NotFound` - User holds no session pair
    async fn logout(&self, user_id: &UserId) -> Result<(), IdentityError>;
}

/// Persistence of user accounts and their permissions.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Open a transaction spanning users, tokens, permissions and sessions.
    ///
    /// # Errors
    /// * `DatabaseError` - Connection could not be acquired
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IdentityError>;

    /// Retrieve user by username.
    ///
    /// # Returns
    /// Optional user entity (None if not found)
    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, IdentityError>;

    /// Replace the stored password hash if the user is still at `expected_version`.
    ///
    /// # Errors
    /// * `Conflict` - Version moved on or user vanished
    async fn update_password_hash(
        &self,
        user_id: &UserId,
        password_hash: &str,
        expected_version: i32,
    ) -> Result<(), IdentityError>;
}

/// Lookups over stored token digests.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Owner of an unexpired token of `scope` with digest `hash`.
    async fn find_user_by_token(
        &self,
        scope: TokenScope,
        hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, IdentityError>;

    /// The user's current session pair, expired or not.
    async fn find_session_pair(&self, user_id: &UserId)
        -> Result<Option<SessionPair>, IdentityError>;

    /// Identity and permissions behind an unexpired access token of an activated user.
    async fn find_identity_by_access_token(
        &self,
        hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<ResolvedAccess>, IdentityError>;
}

/// Storage backing the identity service.
pub trait IdentityStore: CredentialStore + TokenStore {}

impl<T: CredentialStore + TokenStore> IdentityStore for T {}

/// Unit of work over the identity tables. Dropping it without `commit` rolls back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// # Errors
    /// * `UsernameAlreadyExists` / `EmailAlreadyExists` - Uniqueness violated
    async fn insert_user(&mut self, user: &User) -> Result<(), IdentityError>;

    async fn insert_token(&mut self, token: &ScopedToken) -> Result<(), IdentityError>;

    /// Flip `activated` and bump the version.
    ///
    /// # Errors
    /// * `Conflict` - User absent or not at `expected_version`
    async fn activate_user(
        &mut self,
        user_id: &UserId,
        expected_version: i32,
    ) -> Result<(), IdentityError>;

    /// # Errors
    /// * `NotFound` - The user held no token of this scope
    async fn delete_tokens(&mut self, user_id: &UserId, scope: TokenScope)
        -> Result<u64, IdentityError>;

    async fn grant_permission(
        &mut self,
        user_id: &UserId,
        permission: Permission,
    ) -> Result<(), IdentityError>;

    /// # Errors
    /// * `Conflict` - The user already holds a pair
    async fn insert_session_pair(&mut self, pair: &SessionPair) -> Result<(), IdentityError>;

    /// # Errors
    /// * `NotFound` - The user holds no pair
    async fn delete_session_pair(&mut self, user_id: &UserId) -> Result<(), IdentityError>;

    async fn commit(self: Box<Self>) -> Result<(), IdentityError>;
}

/// In-process cache of resolved identities keyed by access-token digest.
pub trait SessionCache: Send + Sync + 'static {
    fn get(&self, key: &TokenHash) -> Option<Identity>;

    /// Store an identity; it disappears once `ttl` has elapsed.
    fn set(&self, key: TokenHash, identity: Identity, ttl: Duration);

    /// Evict every entry belonging to `user_id`.
    fn remove_user(&self, user_id: &UserId);

    fn flush(&self);
}

/// Event publishing for domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    /// Publish user creation event.
    ///
    /// # Arguments
    /// * `event` - UserCreated event
    ///
    /// # Errors
    /// * `SerializationFailed` - Event serialization failed
    /// * `PublishFailed` - Broker rejected the message or delivery timed out
    async fn publish_user_created(
        &self,
        event: &UserCreatedEvent,
    ) -> Result<(), EventPublisherError>;
}
