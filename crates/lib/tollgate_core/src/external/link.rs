//! Resolve the local user for an external sign-in.
//!
//! An existing identity wins. Otherwise the identity is attached to the
//! linking target, to a user with the same verified email when auto-linking
//! is on, or to a newly created user. Creating the user and the identity
//! happens in one transaction.

use thiserror::Error;
use tracing::info;

use super::provider::UserData;
use crate::models::auth::{Identity, NewIdentity, NewUser, User, UserMetadata};
use crate::store::{IdentityStore, StoreError};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Provider did not return an account id")]
    MissingSubject,

    #[error("This identity is already linked to another user")]
    IdentityTaken,

    /// A new user would take an email that already belongs to someone else.
    #[error("A user with this email already exists")]
    EmailTaken,

    #[error("The user owning this identity no longer exists")]
    OwnerMissing,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LinkError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict("identity") => LinkError::IdentityTaken,
            StoreError::Conflict("email") => LinkError::EmailTaken,
            other => LinkError::Store(other),
        }
    }
}

/// How the user was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The identity already existed.
    Existing,
    /// A new identity was attached to an existing user.
    Linked,
    /// A new user was created along with the identity.
    Created,
}

/// Everything needed to resolve an external sign-in.
#[derive(Debug, Clone, Copy)]
pub struct ExternalAccount<'a> {
    pub provider: &'a str,
    pub user_data: &'a UserData,
    pub linking_target: Option<&'a User>,
    pub auto_link_same_email: bool,
}

/// Find or create the user and identity for an external sign-in.
pub async fn link_identity(
    store: &dyn IdentityStore,
    account: ExternalAccount<'_>,
) -> Result<(User, Identity, LinkOutcome), LinkError> {
    let subject = account.user_data.subject().ok_or(LinkError::MissingSubject)?;

    if let Some(identity) = store.find_identity(account.provider, subject).await? {
        if let Some(target) = account.linking_target
            && target.id != identity.user_id
        {
            return Err(LinkError::IdentityTaken);
        }
        let user = store
            .get_user(identity.user_id)
            .await?
            .ok_or(LinkError::OwnerMissing)?;
        return Ok((user, identity, LinkOutcome::Existing));
    }

    let mut owner = account.linking_target.cloned();
    if owner.is_none()
        && account.auto_link_same_email
        && let Some(email) = account.user_data.canonical_email().filter(|e| e.verified)
    {
        owner = store.find_user_by_email(&email.email).await?;
    }

    let provider_data = serde_json::to_value(account.user_data)
        .map_err(|e| StoreError::Internal(format!("provider data: {e}")))?;

    let mut tx = store.begin().await?;
    let (user, outcome) = match owner {
        Some(user) => (user, LinkOutcome::Linked),
        None => {
            let claims = &account.user_data.claims;
            let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
            let user = tx
                .insert_user(NewUser {
                    email: account.user_data.canonical_email().map(|e| e.email.clone()),
                    metadata: UserMetadata {
                        avatar: non_empty(&claims.picture),
                        first_name: non_empty(&claims.given_name),
                        last_name: non_empty(&claims.family_name),
                        ..UserMetadata::default()
                    },
                    ..NewUser::default()
                })
                .await?;
            (user, LinkOutcome::Created)
        }
    };
    let identity = tx
        .insert_identity(NewIdentity {
            user_id: user.id,
            provider: account.provider.to_string(),
            provider_id: subject.to_string(),
            provider_data,
        })
        .await?;
    tx.commit().await?;

    info!(
        user_id = %user.id,
        provider = account.provider,
        outcome = ?outcome,
        "External identity resolved"
    );
    Ok((user, identity, outcome))
}
