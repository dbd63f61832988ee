use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use auth::TokenHash;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;

use crate::domain::identity::models::Identity;
use crate::domain::identity::models::Permission;
use crate::domain::identity::models::ResolvedAccess;
use crate::domain::identity::models::ScopedToken;
use crate::domain::identity::models::SessionPair;
use crate::domain::identity::models::TokenScope;
use crate::domain::identity::models::User;
use crate::domain::identity::models::UserId;
use crate::domain::identity::models::Username;
use crate::domain::identity::ports::CredentialStore;
use crate::domain::identity::ports::StoreTransaction;
use crate::domain::identity::ports::TokenStore;
use crate::identity::errors::IdentityError;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    tokens: HashMap<TokenHash, ScopedToken>,
    permissions: HashMap<UserId, Vec<Permission>>,
    sessions: HashMap<UserId, SessionPair>,
}

impl MemoryState {
    fn user_by_username(&self, username: &Username) -> Option<&User> {
        self.users.values().find(|u| &u.username == username)
    }

    fn insert_user(&mut self, user: &User) -> Result<(), IdentityError> {
        if self.user_by_username(&user.username).is_some() {
            return Err(IdentityError::UsernameAlreadyExists(
                user.username.to_string(),
            ));
        }
        if self.users.values().any(|u| u.email == user.email) {
            return Err(IdentityError::EmailAlreadyExists(user.email.to_string()));
        }

        self.users.insert(user.id, user.clone());
        Ok(())
    }

    fn insert_token(&mut self, token: &ScopedToken) -> Result<(), IdentityError> {
        if !self.users.contains_key(&token.user_id) {
            return Err(IdentityError::NotFound(format!("user {}", token.user_id)));
        }

        self.tokens.insert(token.hash, token.clone());
        Ok(())
    }

    fn activate_user(&mut self, user_id: &UserId, expected_version: i32) -> Result<(), IdentityError> {
        let user = self
            .users
            .get_mut(user_id)
            .filter(|u| u.version == expected_version)
            .ok_or_else(|| IdentityError::Conflict(format!("user {}", user_id)))?;

        user.activated = true;
        user.version += 1;
        Ok(())
    }

    fn delete_tokens(&mut self, user_id: &UserId, scope: TokenScope) -> Result<u64, IdentityError> {
        let before = self.tokens.len();
        self.tokens
            .retain(|_, t| !(&t.user_id == user_id && t.scope == scope));
        let removed = (before - self.tokens.len()) as u64;

        if removed == 0 {
            return Err(IdentityError::NotFound(format!("{} token", scope)));
        }
        Ok(removed)
    }

    fn grant_permission(&mut self, user_id: &UserId, permission: Permission) {
        let granted = self.permissions.entry(*user_id).or_default();
        if !granted.contains(&permission) {
            granted.push(permission);
        }
    }

    fn insert_session_pair(&mut self, pair: &SessionPair) -> Result<(), IdentityError> {
        if self.sessions.contains_key(&pair.user_id) {
            return Err(IdentityError::Conflict(format!(
                "session pair for user {}",
                pair.user_id
            )));
        }

        self.sessions.insert(pair.user_id, pair.clone());
        Ok(())
    }

    fn delete_session_pair(&mut self, user_id: &UserId) -> Result<(), IdentityError> {
        self.sessions
            .remove(user_id)
            .map(|_| ())
            .ok_or_else(|| IdentityError::NotFound(format!("session pair for user {}", user_id)))
    }

    fn apply(&mut self, write: &Write) -> Result<(), IdentityError> {
        match write {
            Write::InsertUser(user) => self.insert_user(user),
            Write::InsertToken(token) => self.insert_token(token),
            Write::ActivateUser {
                user_id,
                expected_version,
            } => self.activate_user(user_id, *expected_version),
            Write::DeleteTokens { user_id, scope } => self.delete_tokens(user_id, *scope).map(|_| ()),
            Write::GrantPermission {
                user_id,
                permission,
            } => {
                self.grant_permission(user_id, *permission);
                Ok(())
            }
            Write::InsertSessionPair(pair) => self.insert_session_pair(pair),
            Write::DeleteSessionPair(user_id) => self.delete_session_pair(user_id),
        }
    }
}

/// A statement recorded by a transaction and replayed against the live
/// state at commit.
#[derive(Debug, Clone)]
enum Write {
    InsertUser(User),
    InsertToken(ScopedToken),
    ActivateUser {
        user_id: UserId,
        expected_version: i32,
    },
    DeleteTokens {
        user_id: UserId,
        scope: TokenScope,
    },
    GrantPermission {
        user_id: UserId,
        permission: Permission,
    },
    InsertSessionPair(SessionPair),
    DeleteSessionPair(UserId),
}

/// Volatile identity store for tests and local development.
///
/// Enforces the same constraints as the relational schema. Transactions read
/// their own writes from a snapshot and replay them against the live state at
/// commit, all or nothing. Writes touching disjoint rows commit independently;
/// a write whose row changed underneath it fails the same way the relational
/// constraint or version guard would.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live tokens of `scope` owned by `user_id`.
    pub fn token_count(&self, user_id: &UserId, scope: TokenScope) -> usize {
        self.lock()
            .tokens
            .values()
            .filter(|t| &t.user_id == user_id && t.scope == scope)
            .count()
    }

    pub fn permissions(&self, user_id: &UserId) -> Vec<Permission> {
        self.lock()
            .permissions
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Move the user's session pair past both expiries.
    pub fn expire_session_pair(&self, user_id: &UserId) {
        let mut state = self.lock();
        if let Some(pair) = state.sessions.get_mut(user_id) {
            let past = Utc::now() - Duration::seconds(1);
            pair.access_expiry = past;
            pair.refresh_expiry = past;
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryIdentityStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IdentityError> {
        let snapshot = self.lock().clone();

        Ok(Box::new(InMemoryTransaction {
            live: Arc::clone(&self.state),
            working: snapshot,
            writes: Vec::new(),
        }))
    }

    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, IdentityError> {
        Ok(self.lock().user_by_username(username).cloned())
    }

    async fn update_password_hash(
        &self,
        user_id: &UserId,
        password_hash: &str,
        expected_version: i32,
    ) -> Result<(), IdentityError> {
        let mut state = self.lock();
        let user = state
            .users
            .get_mut(user_id)
            .filter(|u| u.version == expected_version)
            .ok_or_else(|| IdentityError::Conflict(format!("user {}", user_id)))?;

        user.password_hash = password_hash.to_string();
        user.version += 1;

        Ok(())
    }
}

#[async_trait]
impl TokenStore for InMemoryIdentityStore {
    async fn find_user_by_token(
        &self,
        scope: TokenScope,
        hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, IdentityError> {
        let state = self.lock();

        Ok(state
            .tokens
            .get(hash)
            .filter(|t| t.scope == scope && !t.is_expired_at(now))
            .and_then(|t| state.users.get(&t.user_id))
            .cloned())
    }

    async fn find_session_pair(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SessionPair>, IdentityError> {
        Ok(self.lock().sessions.get(user_id).cloned())
    }

    async fn find_identity_by_access_token(
        &self,
        hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<ResolvedAccess>, IdentityError> {
        let state = self.lock();

        let Some(pair) = state
            .sessions
            .values()
            .find(|p| &p.access_hash == hash && p.access_expiry > now)
        else {
            return Ok(None);
        };

        Ok(state
            .users
            .get(&pair.user_id)
            .filter(|u| u.activated)
            .map(|user| ResolvedAccess {
                identity: Identity {
                    user_id: user.id,
                    username: user.username.clone(),
                    email: user.email.clone(),
                    activated: user.activated,
                    version: user.version,
                    permissions: state
                        .permissions
                        .get(&user.id)
                        .cloned()
                        .unwrap_or_default(),
                },
                access_expiry: pair.access_expiry,
            }))
    }
}

struct InMemoryTransaction {
    live: Arc<Mutex<MemoryState>>,
    working: MemoryState,
    writes: Vec<Write>,
}

impl InMemoryTransaction {
    fn record(&mut self, write: Write) -> Result<(), IdentityError> {
        self.working.apply(&write)?;
        self.writes.push(write);
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert_user(&mut self, user: &User) -> Result<(), IdentityError> {
        self.record(Write::InsertUser(user.clone()))
    }

    async fn insert_token(&mut self, token: &ScopedToken) -> Result<(), IdentityError> {
        self.record(Write::InsertToken(token.clone()))
    }

    async fn activate_user(
        &mut self,
        user_id: &UserId,
        expected_version: i32,
    ) -> Result<(), IdentityError> {
        self.record(Write::ActivateUser {
            user_id: *user_id,
            expected_version,
        })
    }

    async fn delete_tokens(
        &mut self,
        user_id: &UserId,
        scope: TokenScope,
    ) -> Result<u64, IdentityError> {
        let removed = self.working.delete_tokens(user_id, scope)?;
        self.writes.push(Write::DeleteTokens {
            user_id: *user_id,
            scope,
        });
        Ok(removed)
    }

    async fn grant_permission(
        &mut self,
        user_id: &UserId,
        permission: Permission,
    ) -> Result<(), IdentityError> {
        self.record(Write::GrantPermission {
            user_id: *user_id,
            permission,
        })
    }

    async fn insert_session_pair(&mut self, pair: &SessionPair) -> Result<(), IdentityError> {
        self.record(Write::InsertSessionPair(pair.clone()))
    }

    async fn delete_session_pair(&mut self, user_id: &UserId) -> Result<(), IdentityError> {
        self.record(Write::DeleteSessionPair(*user_id))
    }

    async fn commit(self: Box<Self>) -> Result<(), IdentityError> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = live.clone();
        for write in &self.writes {
            next.apply(write)?;
        }
        *live = next;

        Ok(())
    }
}
