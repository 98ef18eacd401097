//! Authentication logic: access tokens, refresh rotation, passwords and
//! user creation.
//!
//! Transport-agnostic; `tollgate_api` maps these errors onto HTTP responses.

pub mod jwt;
pub mod password;
pub mod refresh;
pub mod users;
pub mod validation;

use thiserror::Error;

use crate::store::StoreError;

/// Credential authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    CredentialError,

    #[error("Password hashing error: {0}")]
    Password(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
