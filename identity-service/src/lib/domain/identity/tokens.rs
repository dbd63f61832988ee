use auth::PlainToken;
use chrono::Duration;
use chrono::Utc;

use crate::domain::identity::models::ClientMetadata;
use crate::domain::identity::models::ResolvedAccess;
use crate::domain::identity::models::ScopedToken;
use crate::domain::identity::models::SessionCredentials;
use crate::domain::identity::models::SessionPair;
use crate::domain::identity::models::TokenScope;
use crate::domain::identity::models::User;
use crate::domain::identity::models::UserId;
use crate::domain::identity::ports::TokenStore;
use crate::identity::errors::IdentityError;

/// Lifetimes of the three token kinds.
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub activation: Duration,
    pub access: Duration,
    pub refresh: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            activation: Duration::days(3),
            access: Duration::days(7),
            refresh: Duration::days(30),
        }
    }
}

/// Issues opaque tokens and resolves presented ones.
///
/// Writes go through the caller's transaction; this type only mints tokens
/// and performs the digest lookups.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthority {
    lifetimes: TokenLifetimes,
}

impl TokenAuthority {
    pub fn new(lifetimes: TokenLifetimes) -> Self {
        Self { lifetimes }
    }

    pub fn lifetimes(&self) -> &TokenLifetimes {
        &self.lifetimes
    }

    /// Mint a single-use token for `owner`.
    ///
    /// # Returns
    /// Plaintext for the owner and the record to persist
    pub fn issue(
        &self,
        owner: &UserId,
        ttl: Duration,
        scope: TokenScope,
    ) -> Result<(PlainToken, ScopedToken), IdentityError> {
        let plaintext = PlainToken::generate()?;
        let record = ScopedToken {
            hash: plaintext.hash(),
            user_id: *owner,
            expiry: Utc::now() + ttl,
            scope,
        };

        Ok((plaintext, record))
    }

    pub fn issue_activation(
        &self,
        owner: &UserId,
    ) -> Result<(PlainToken, ScopedToken), IdentityError> {
        self.issue(owner, self.lifetimes.activation, TokenScope::Activation)
    }

    /// Mint a fresh access/refresh pair. Replacing the stored pair is the
    /// caller's job, inside its own transaction.
    pub fn issue_session_pair(
        &self,
        owner: &UserId,
        client: ClientMetadata,
    ) -> Result<(SessionCredentials, SessionPair), IdentityError> {
        let access_token = PlainToken::generate()?;
        let refresh_token = PlainToken::generate()?;
        let now = Utc::now();

        let pair = SessionPair {
            user_id: *owner,
            access_hash: access_token.hash(),
            refresh_hash: refresh_token.hash(),
            access_expiry: now + self.lifetimes.access,
            refresh_expiry: now + self.lifetimes.refresh,
            client,
        };

        Ok((
            SessionCredentials {
                access_token,
                refresh_token,
            },
            pair,
        ))
    }

    /// Owner of a presented single-use token.
    ///
    /// # Errors
    /// * `Validation` - Malformed token, no storage access happens
    /// * `NotFound` - Unknown, expired or consumed
    pub async fn resolve<S: TokenStore>(
        &self,
        store: &S,
        scope: TokenScope,
        presented: &str,
    ) -> Result<User, IdentityError> {
        let token = PlainToken::parse(presented)?;

        store
            .find_user_by_token(scope, &token.hash(), Utc::now())
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("{} token", scope)))
    }

    /// Identity behind a presented access token.
    ///
    /// # Errors
    /// * `Validation` - Malformed token, no storage access happens
    /// * `NotFound` - Unknown or expired
    pub async fn resolve_access_token<S: TokenStore>(
        &self,
        store: &S,
        presented: &PlainToken,
    ) -> Result<ResolvedAccess, IdentityError> {
        store
            .find_identity_by_access_token(&presented.hash(), Utc::now())
            .await?
            .ok_or_else(|| IdentityError::NotFound("access token".to_string()))
    }
}
