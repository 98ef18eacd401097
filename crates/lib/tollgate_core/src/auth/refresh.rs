//! Refresh token issuing and single-use rotation.
//!
//! Plaintext tokens are 32 random bytes, base64url encoded, and only ever
//! returned to the caller. The store keeps the SHA-256 hex digest.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::jwt::{AccessToken, TokenError, TokenIssuer};
use crate::models::auth::User;
use crate::store::{IdentityStore, StoreError, StoreTx};

/// Refresh token errors.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Refresh token not found")]
    NotFound,

    #[error("Refresh token has been revoked")]
    Revoked,

    #[error("User not found")]
    UserNotFound,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Access plus refresh token pair handed to a client.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access: AccessToken,
    pub refresh_token: String,
    pub user: User,
}

/// Generate a new plaintext refresh token.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest used as the stored form of a refresh token.
pub fn hash_refresh_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Issues and rotates refresh tokens.
#[derive(Clone)]
pub struct RefreshEngine {
    store: Arc<dyn IdentityStore>,
    issuer: Arc<TokenIssuer>,
}

impl RefreshEngine {
    pub fn new(store: Arc<dyn IdentityStore>, issuer: Arc<TokenIssuer>) -> Self {
        Self { store, issuer }
    }

    /// Mint an access token and a fresh refresh token for `user`.
    pub async fn issue(&self, user: &User) -> Result<IssuedTokens, RefreshError> {
        let mut tx = self.store.begin().await?;
        let tokens = self.issue_in(tx.as_mut(), user).await?;
        tx.commit().await?;
        debug!(user_id = %user.id, "Issued session tokens");
        Ok(tokens)
    }

    /// Like [`RefreshEngine::issue`] but inside a caller-owned transaction.
    pub async fn issue_in(
        &self,
        tx: &mut dyn StoreTx,
        user: &User,
    ) -> Result<IssuedTokens, RefreshError> {
        let access = self.issuer.issue(user)?;
        let refresh_token = generate_refresh_token();
        tx.insert_refresh_token(user.id, &hash_refresh_token(&refresh_token))
            .await?;
        Ok(IssuedTokens {
            access,
            refresh_token,
            user: user.clone(),
        })
    }

    /// Exchange a refresh token for a new pair. The presented token is
    /// revoked in the same transaction that stores its successor, so it can be
    /// used at most once; any failure leaves it untouched.
    pub async fn rotate(&self, presented: &str) -> Result<IssuedTokens, RefreshError> {
        let mut tx = self.store.begin().await?;

        let record = tx
            .find_refresh_token_for_update(&hash_refresh_token(presented))
            .await?
            .ok_or(RefreshError::NotFound)?;
        if record.revoked {
            info!(user_id = %record.user_id, "Revoked refresh token presented");
            return Err(RefreshError::Revoked);
        }

        tx.revoke_refresh_token(record.id).await?;
        let user = tx
            .get_user(record.user_id)
            .await?
            .ok_or(RefreshError::UserNotFound)?;
        let tokens = self.issue_in(tx.as_mut(), &user).await?;
        tx.commit().await?;

        debug!(user_id = %user.id, "Rotated refresh token");
        Ok(tokens)
    }

    /// Revoke every refresh token of a user (global logout).
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, RefreshError> {
        let revoked = self.store.revoke_user_refresh_tokens(user_id).await?;
        info!(user_id = %user_id, revoked, "Revoked refresh tokens");
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyConfig, KeySet};
    use crate::models::auth::NewUser;
    use crate::store::MemoryStore;

    async fn setup() -> (MemoryStore, RefreshEngine, User) {
        let store = MemoryStore::new();
        let keys = KeySet::load(&KeyConfig {
            secret: "test-secret".into(),
            ..KeyConfig::default()
        })
        .unwrap();
        let issuer = Arc::new(TokenIssuer::new(Arc::new(keys), 3600));
        let engine = RefreshEngine::new(Arc::new(store.clone()), issuer);

        let mut tx = store.begin().await.unwrap();
        let user = tx
            .insert_user(NewUser {
                email: Some("alice@example.com".into()),
                ..NewUser::default()
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        (store, engine, user)
    }

    #[test]
    fn generated_tokens_are_unique_and_url_safe() {
        let a = generate_refresh_token();
        let b = generate_refresh_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_refresh_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn issue_stores_only_the_hash() {
        let (store, engine, user) = setup().await;
        let issued = engine.issue(&user).await.unwrap();
        let stored = store.refresh_tokens_for(user.id).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].token_hash, hash_refresh_token(&issued.refresh_token));
        assert_ne!(stored[0].token_hash, issued.refresh_token);
    }

    #[tokio::test]
    async fn rotation_is_single_use() {
        let (_store, engine, user) = setup().await;
        let first = engine.issue(&user).await.unwrap();

        let second = engine.rotate(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(second.user.id, user.id);

        assert!(matches!(
            engine.rotate(&first.refresh_token).await,
            Err(RefreshError::Revoked)
        ));
        engine.rotate(&second.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let (_store, engine, _user) = setup().await;
        assert!(matches!(
            engine.rotate("does-not-exist").await,
            Err(RefreshError::NotFound)
        ));
    }

    #[tokio::test]
    async fn concurrent_rotation_has_exactly_one_winner() {
        let (_store, engine, user) = setup().await;
        let token = engine.issue(&user).await.unwrap().refresh_token;

        let (a, b) = tokio::join!(engine.rotate(&token), engine.rotate(&token));
        let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(wins, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(RefreshError::Revoked)));
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_revocation() {
        let (store, engine, user) = setup().await;
        let token = engine.issue(&user).await.unwrap().refresh_token;

        store.fail_refresh_token_inserts(true);
        assert!(matches!(
            engine.rotate(&token).await,
            Err(RefreshError::Store(_))
        ));
        let stored = store.refresh_tokens_for(user.id).await;
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].revoked);

        store.fail_refresh_token_inserts(false);
        engine.rotate(&token).await.unwrap();
    }

    #[tokio::test]
    async fn revoke_all_blocks_further_rotation() {
        let (_store, engine, user) = setup().await;
        let a = engine.issue(&user).await.unwrap().refresh_token;
        let b = engine.issue(&user).await.unwrap().refresh_token;

        assert_eq!(engine.revoke_all(user.id).await.unwrap(), 2);
        assert!(matches!(engine.rotate(&a).await, Err(RefreshError::Revoked)));
        assert!(matches!(engine.rotate(&b).await, Err(RefreshError::Revoked)));
    }
}
