//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{IdentityStore, StoreError, StoreTx};
use crate::models::auth::{
    Identity, NewIdentity, NewUser, RefreshToken, User, UserMetadata,
};
use crate::uuid::uuidv7;

const USER_COLUMNS: &str = "id, email, username, phone, password_hash, meta_avatar, \
     meta_first_name, meta_last_name, meta_birthdate, meta_extra, created_at, updated_at, \
     last_sign_in";

const IDENTITY_COLUMNS: &str =
    "id, user_id, provider, provider_id, provider_data, created_at, updated_at, last_sign_in";

const REFRESH_COLUMNS: &str = "id, user_id, token_hash, revoked, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: Option<String>,
    username: Option<String>,
    phone: Option<String>,
    password_hash: Option<String>,
    meta_avatar: Option<String>,
    meta_first_name: Option<String>,
    meta_last_name: Option<String>,
    meta_birthdate: Option<NaiveDate>,
    meta_extra: sqlx::types::Json<serde_json::Map<String, serde_json::Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_sign_in: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            username: row.username,
            phone: row.phone,
            password_hash: row.password_hash,
            metadata: UserMetadata {
                avatar: row.meta_avatar,
                first_name: row.meta_first_name,
                last_name: row.meta_last_name,
                birthdate: row.meta_birthdate,
                extra: row.meta_extra.0,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_sign_in: row.last_sign_in,
        }
    }
}

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    user_id: Uuid,
    provider: String,
    provider_id: String,
    provider_data: sqlx::types::Json<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_sign_in: Option<DateTime<Utc>>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Identity {
            id: row.id,
            user_id: row.user_id,
            provider: row.provider,
            provider_id: row.provider_id,
            provider_data: row.provider_data.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_sign_in: row.last_sign_in,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RefreshRow {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    revoked: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RefreshRow> for RefreshToken {
    fn from(row: RefreshRow) -> Self {
        RefreshToken {
            id: row.id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            revoked: row.revoked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Map unique violations to [`StoreError::Conflict`] naming the field.
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        let field = match db.constraint() {
            Some("users_email_key") => "email",
            Some("users_username_key") => "username",
            Some("users_phone_key") => "phone",
            Some("identities_provider_provider_id_key") => "identity",
            Some("refresh_tokens_token_hash_key") => "refresh token",
            _ => "record",
        };
        return StoreError::Conflict(field);
    }
    StoreError::Database(err)
}

/// Store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_user_by(&self, column: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_user_by("email", email).await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_user_by("username", username).await
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        self.find_user_by("phone", phone).await
    }

    async fn find_identity(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE provider = $1 AND provider_id = $2"
        );
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(provider)
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Identity::from))
    }

    async fn record_sign_in(
        &self,
        user_id: Uuid,
        identity_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_sign_in = now(), updated_at = now() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if let Some(identity_id) = identity_id {
            sqlx::query(
                "UPDATE identities SET last_sign_in = now(), updated_at = now() WHERE id = $1",
            )
            .bind(identity_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn revoke_user_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = true, updated_at = now() \
             WHERE user_id = $1 AND NOT revoked",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Transaction over a pooled connection. Rolls back on drop.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn get_user(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_refresh_token_for_update(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let sql =
            format!("SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token_hash = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, RefreshRow>(&sql)
            .bind(token_hash)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(RefreshToken::from))
    }

    async fn revoke_refresh_token(&mut self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE refresh_tokens SET revoked = true, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_refresh_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
    ) -> Result<RefreshToken, StoreError> {
        let sql = format!(
            "INSERT INTO refresh_tokens (id, user_id, token_hash) VALUES ($1, $2, $3) \
             RETURNING {REFRESH_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RefreshRow>(&sql)
            .bind(uuidv7())
            .bind(user_id)
            .bind(token_hash)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_write_error)?;
        Ok(row.into())
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (email, username, phone, password_hash, meta_avatar, \
             meta_first_name, meta_last_name, meta_birthdate, meta_extra) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.email)
            .bind(user.username)
            .bind(user.phone)
            .bind(user.password_hash)
            .bind(user.metadata.avatar)
            .bind(user.metadata.first_name)
            .bind(user.metadata.last_name)
            .bind(user.metadata.birthdate)
            .bind(sqlx::types::Json(user.metadata.extra))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_write_error)?;
        Ok(row.into())
    }

    async fn insert_identity(&mut self, identity: NewIdentity) -> Result<Identity, StoreError> {
        let sql = format!(
            "INSERT INTO identities (id, user_id, provider, provider_id, provider_data, last_sign_in) \
             VALUES ($1, $2, $3, $4, $5, now()) RETURNING {IDENTITY_COLUMNS}"
        );
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(uuidv7())
            .bind(identity.user_id)
            .bind(identity.provider)
            .bind(identity.provider_id)
            .bind(sqlx::types::Json(identity.provider_data))
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_write_error)?;
        Ok(row.into())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
