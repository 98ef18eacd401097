//! Persistence for users, identities and refresh tokens.
//!
//! [`IdentityStore`] covers single-statement reads and writes; anything that
//! must be atomic goes through a [`StoreTx`] obtained from
//! [`IdentityStore::begin`]. Dropping a transaction without calling
//! [`StoreTx::commit`] rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{Identity, NewIdentity, NewUser, RefreshToken, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. Names the conflicting field.
    #[error("{0} already exists")]
    Conflict(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Internal(String),
}

/// Storage for users, identities and refresh tokens.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Start a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError>;

    async fn find_identity(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<Identity>, StoreError>;

    /// Stamp `last_sign_in` on the user and, when given, the identity used.
    async fn record_sign_in(
        &self,
        user_id: Uuid,
        identity_id: Option<Uuid>,
    ) -> Result<(), StoreError>;

    /// Revoke every active refresh token of a user. Returns how many were revoked.
    async fn revoke_user_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError>;
}

/// Operations that run inside one transaction.
#[async_trait]
pub trait StoreTx: Send {
    async fn get_user(&mut self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Find a refresh token by hash and lock it until the transaction ends.
    async fn find_refresh_token_for_update(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, StoreError>;

    async fn revoke_refresh_token(&mut self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_refresh_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
    ) -> Result<RefreshToken, StoreError>;

    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError>;

    async fn insert_identity(&mut self, identity: NewIdentity) -> Result<Identity, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
