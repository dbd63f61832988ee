use async_trait::async_trait;
use auth::TokenHash;
use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Transaction;
use uuid::Uuid;

use crate::domain::identity::models::ClientMetadata;
use crate::domain::identity::models::EmailAddress;
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

pub struct PostgresIdentityStore {
    pool: PgPool,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    activated: bool,
    version: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = IdentityError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId(row.id),
            username: Username::new(row.username)
                .map_err(|e| IdentityError::DatabaseError(format!("stored username: {}", e)))?,
            email: EmailAddress::new(row.email)
                .map_err(|e| IdentityError::DatabaseError(format!("stored email: {}", e)))?,
            password_hash: row.password_hash,
            activated: row.activated,
            version: row.version,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionPairRow {
    user_id: Uuid,
    access_hash: Vec<u8>,
    refresh_hash: Vec<u8>,
    access_expiry: DateTime<Utc>,
    refresh_expiry: DateTime<Utc>,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl TryFrom<SessionPairRow> for SessionPair {
    type Error = IdentityError;

    fn try_from(row: SessionPairRow) -> Result<Self, Self::Error> {
        Ok(SessionPair {
            user_id: UserId(row.user_id),
            access_hash: TokenHash::from_slice(&row.access_hash)?,
            refresh_hash: TokenHash::from_slice(&row.refresh_hash)?,
            access_expiry: row.access_expiry,
            refresh_expiry: row.refresh_expiry,
            client: ClientMetadata {
                ip_address: row.ip_address,
                user_agent: row.user_agent,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    username: String,
    email: String,
    activated: bool,
    version: i32,
    access_expiry: DateTime<Utc>,
    permissions: Vec<String>,
}

impl TryFrom<IdentityRow> for ResolvedAccess {
    type Error = IdentityError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        let user_id = UserId(row.id);
        let permissions = row
            .permissions
            .iter()
            .filter_map(|name| match name.parse::<Permission>() {
                Ok(permission) => Some(permission),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Ignoring stored permission");
                    None
                }
            })
            .collect();

        Ok(ResolvedAccess {
            identity: Identity {
                user_id,
                username: Username::new(row.username)
                    .map_err(|e| IdentityError::DatabaseError(format!("stored username: {}", e)))?,
                email: EmailAddress::new(row.email)
                    .map_err(|e| IdentityError::DatabaseError(format!("stored email: {}", e)))?,
                activated: row.activated,
                version: row.version,
                permissions,
            },
            access_expiry: row.access_expiry,
        })
    }
}

fn database_error(e: sqlx::Error) -> IdentityError {
    IdentityError::DatabaseError(e.to_string())
}

#[async_trait]
impl CredentialStore for PostgresIdentityStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, IdentityError> {
        let transaction = self.pool.begin().await.map_err(database_error)?;
        Ok(Box::new(PostgresTransaction { transaction }))
    }

    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, IdentityError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, activated, version, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?
        .map(User::try_from)
        .transpose()
    }

    async fn update_password_hash(
        &self,
        user_id: &UserId,
        password_hash: &str,
        expected_version: i32,
    ) -> Result<(), IdentityError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $3
            "#,
        )
        .bind(user_id.0)
        .bind(password_hash)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::Conflict(format!("user {}", user_id)));
        }

        Ok(())
    }
}

#[async_trait]
impl TokenStore for PostgresIdentityStore {
    async fn find_user_by_token(
        &self,
        scope: TokenScope,
        hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, IdentityError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.username, u.email, u.password_hash, u.activated, u.version, u.created_at
            FROM users u
            INNER JOIN tokens t ON t.user_id = u.id
            WHERE t.hash = $1 AND t.scope = $2 AND t.expiry > $3
            "#,
        )
        .bind(hash.as_bytes())
        .bind(scope.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?
        .map(User::try_from)
        .transpose()
    }

    async fn find_session_pair(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SessionPair>, IdentityError> {
        sqlx::query_as::<_, SessionPairRow>(
            r#"
            SELECT user_id, access_hash, refresh_hash, access_expiry, refresh_expiry,
                   ip_address, user_agent
            FROM session_pairs
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?
        .map(SessionPair::try_from)
        .transpose()
    }

    async fn find_identity_by_access_token(
        &self,
        hash: &TokenHash,
        now: DateTime<Utc>,
    ) -> Result<Option<ResolvedAccess>, IdentityError> {
        sqlx::query_as::<_, IdentityRow>(
            r#"
            SELECT u.id, u.username, u.email, u.activated, u.version, s.access_expiry,
                   COALESCE(
                       array_agg(p.permission) FILTER (WHERE p.permission IS NOT NULL),
                       '{}'
                   ) AS permissions
            FROM session_pairs s
            INNER JOIN users u ON u.id = s.user_id
            LEFT JOIN user_permissions p ON p.user_id = u.id
            WHERE s.access_hash = $1 AND s.access_expiry > $2 AND u.activated
            GROUP BY u.id, s.access_expiry
            "#,
        )
        .bind(hash.as_bytes())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?
        .map(ResolvedAccess::try_from)
        .transpose()
    }
}

/// Open Postgres transaction; rolled back by sqlx when dropped uncommitted.
pub struct PostgresTransaction {
    transaction: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn insert_user(&mut self, user: &User) -> Result<(), IdentityError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, activated, version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id.0)
        .bind(user.username.as_str())
        .bind(user.email.as_str())
        .bind(&user.password_hash)
        .bind(user.activated)
        .bind(user.version)
        .bind(user.created_at)
        .execute(&mut *self.transaction)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    if db_err.constraint() == Some("users_username_key") {
                        return IdentityError::UsernameAlreadyExists(user.username.to_string());
                    }
                    if db_err.constraint() == Some("users_email_key") {
                        return IdentityError::EmailAlreadyExists(user.email.to_string());
                    }
                }
            }
            database_error(e)
        })?;

        Ok(())
    }

    async fn insert_token(&mut self, token: &ScopedToken) -> Result<(), IdentityError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (hash, user_id, expiry, scope)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(token.hash.as_bytes())
        .bind(token.user_id.0)
        .bind(token.expiry)
        .bind(token.scope.as_str())
        .execute(&mut *self.transaction)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    async fn activate_user(
        &mut self,
        user_id: &UserId,
        expected_version: i32,
    ) -> Result<(), IdentityError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET activated = TRUE, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(user_id.0)
        .bind(expected_version)
        .execute(&mut *self.transaction)
        .await
        .map_err(database_error)?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::Conflict(format!("user {}", user_id)));
        }

        Ok(())
    }

    async fn delete_tokens(
        &mut self,
        user_id: &UserId,
        scope: TokenScope,
    ) -> Result<u64, IdentityError> {
        let result = sqlx::query(
            r#"
            DELETE FROM tokens
            WHERE user_id = $1 AND scope = $2
            "#,
        )
        .bind(user_id.0)
        .bind(scope.as_str())
        .execute(&mut *self.transaction)
        .await
        .map_err(database_error)?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound(format!("{} token", scope)));
        }

        Ok(result.rows_affected())
    }

    async fn grant_permission(
        &mut self,
        user_id: &UserId,
        permission: Permission,
    ) -> Result<(), IdentityError> {
        sqlx::query(
            r#"
            INSERT INTO user_permissions (user_id, permission)
            VALUES ($1, $2)
            ON CONFLICT (user_id, permission) DO NOTHING
            "#,
        )
        .bind(user_id.0)
        .bind(permission.as_str())
        .execute(&mut *self.transaction)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    async fn insert_session_pair(&mut self, pair: &SessionPair) -> Result<(), IdentityError> {
        sqlx::query(
            r#"
            INSERT INTO session_pairs
                (user_id, access_hash, refresh_hash, access_expiry, refresh_expiry,
                 ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(pair.user_id.0)
        .bind(pair.access_hash.as_bytes())
        .bind(pair.refresh_hash.as_bytes())
        .bind(pair.access_expiry)
        .bind(pair.refresh_expiry)
        .bind(pair.client.ip_address.as_deref())
        .bind(pair.client.user_agent.as_deref())
        .execute(&mut *self.transaction)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return IdentityError::Conflict(format!(
                        "session pair for user {}",
                        pair.user_id
                    ));
                }
            }
            database_error(e)
        })?;

        Ok(())
    }

    async fn delete_session_pair(&mut self, user_id: &UserId) -> Result<(), IdentityError> {
        let result = sqlx::query(
            r#"
            DELETE FROM session_pairs
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.0)
        .execute(&mut *self.transaction)
        .await
        .map_err(database_error)?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound(format!(
                "session pair for user {}",
                user_id
            )));
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), IdentityError> {
        self.transaction.commit().await.map_err(database_error)
    }
}
