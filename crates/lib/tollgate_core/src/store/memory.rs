//! In-memory store for tests and database-less development runs.
//!
//! A transaction takes the store-wide lock and works on a staged copy of the
//! data; commit swaps the copy in, drop throws it away. Transactions are
//! therefore fully serialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{IdentityStore, StoreError, StoreTx};
use crate::models::auth::{Identity, NewIdentity, NewUser, RefreshToken, User};
use crate::uuid::uuidv7;

#[derive(Debug, Clone, Default)]
struct Data {
    users: HashMap<Uuid, User>,
    identities: HashMap<Uuid, Identity>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
}

impl Data {
    fn find_user(&self, pred: impl Fn(&User) -> bool) -> Option<User> {
        self.users.values().find(|u| pred(u)).cloned()
    }

    fn insert_user(&mut self, new: NewUser) -> Result<User, StoreError> {
        let taken = |value: &Option<String>, column: fn(&User) -> Option<&str>| {
            value
                .as_deref()
                .is_some_and(|value| self.users.values().any(|u| column(u) == Some(value)))
        };
        if taken(&new.email, |u| u.email.as_deref()) {
            return Err(StoreError::Conflict("email"));
        }
        if taken(&new.username, |u| u.username.as_deref()) {
            return Err(StoreError::Conflict("username"));
        }
        if taken(&new.phone, |u| u.phone.as_deref()) {
            return Err(StoreError::Conflict("phone"));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            username: new.username,
            phone: new.phone,
            password_hash: new.password_hash,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            last_sign_in: None,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }
}

/// Store that keeps everything in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Data>>,
    fail_refresh_inserts: Arc<AtomicBool>,
    fail_sign_in_records: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every refresh-token insert fail until switched off again.
    pub fn fail_refresh_token_inserts(&self, fail: bool) {
        self.fail_refresh_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every `record_sign_in` fail until switched off again.
    pub fn fail_sign_in_records(&self, fail: bool) {
        self.fail_sign_in_records.store(fail, Ordering::SeqCst);
    }

    /// All refresh tokens of a user, oldest first.
    pub async fn refresh_tokens_for(&self, user_id: Uuid) -> Vec<RefreshToken> {
        let data = self.data.lock().await;
        let mut tokens: Vec<RefreshToken> = data
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.id);
        tokens
    }

    /// All identities linked to a user.
    pub async fn identities_for(&self, user_id: Uuid) -> Vec<Identity> {
        let data = self.data.lock().await;
        data.identities
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.data.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            staged,
            fail_refresh_inserts: self.fail_refresh_inserts.load(Ordering::SeqCst),
        }))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.data.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .data
            .lock()
            .await
            .find_user(|u| u.email.as_deref() == Some(email)))
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .data
            .lock()
            .await
            .find_user(|u| u.username.as_deref() == Some(username)))
    }

    async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .data
            .lock()
            .await
            .find_user(|u| u.phone.as_deref() == Some(phone)))
    }

    async fn find_identity(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .identities
            .values()
            .find(|i| i.provider == provider && i.provider_id == provider_id)
            .cloned())
    }

    async fn record_sign_in(
        &self,
        user_id: Uuid,
        identity_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        if self.fail_sign_in_records.load(Ordering::SeqCst) {
            return Err(StoreError::Internal("sign-in record failed".into()));
        }
        let now = Utc::now();
        let mut data = self.data.lock().await;
        if let Some(user) = data.users.get_mut(&user_id) {
            user.last_sign_in = Some(now);
            user.updated_at = now;
        }
        if let Some(identity) = identity_id.and_then(|id| data.identities.get_mut(&id)) {
            identity.last_sign_in = Some(now);
            identity.updated_at = now;
        }
        Ok(())
    }

    async fn revoke_user_refresh_tokens(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut data = self.data.lock().await;
        let mut revoked = 0;
        for token in data
            .refresh_tokens
            .values_mut()
            .filter(|t| t.user_id == user_id && !t.revoked)
        {
            token.revoked = true;
            token.updated_at = now;
            revoked += 1;
        }
        Ok(revoked)
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Data>,
    staged: Data,
    fail_refresh_inserts: bool,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_user(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.staged.users.get(&id).cloned())
    }

    async fn find_refresh_token_for_update(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        Ok(self
            .staged
            .refresh_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_refresh_token(&mut self, id: Uuid) -> Result<(), StoreError> {
        if let Some(token) = self.staged.refresh_tokens.get_mut(&id) {
            token.revoked = true;
            token.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_refresh_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
    ) -> Result<RefreshToken, StoreError> {
        if self.fail_refresh_inserts {
            return Err(StoreError::Internal("refresh token insert failed".into()));
        }
        if self
            .staged
            .refresh_tokens
            .values()
            .any(|t| t.token_hash == token_hash)
        {
            return Err(StoreError::Conflict("refresh token"));
        }
        let now = Utc::now();
        let token = RefreshToken {
            id: uuidv7(),
            user_id,
            token_hash: token_hash.to_string(),
            revoked: false,
            created_at: now,
            updated_at: now,
        };
        self.staged.refresh_tokens.insert(token.id, token.clone());
        Ok(token)
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        self.staged.insert_user(user)
    }

    async fn insert_identity(&mut self, identity: NewIdentity) -> Result<Identity, StoreError> {
        if self
            .staged
            .identities
            .values()
            .any(|i| i.provider == identity.provider && i.provider_id == identity.provider_id)
        {
            return Err(StoreError::Conflict("identity"));
        }
        let now = Utc::now();
        let identity = Identity {
            id: uuidv7(),
            user_id: identity.user_id,
            provider: identity.provider,
            provider_id: identity.provider_id,
            provider_data: identity.provider_data,
            created_at: now,
            updated_at: now,
            last_sign_in: Some(now),
        };
        self.staged.identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}
