//! Credential sign-up and sign-in.

use thiserror::Error;
use tracing::info;

use super::AuthError;
use super::password::{hash_password, verify_password};
use super::validation::{FieldError, Validator};
use crate::models::auth::{NewUser, User, UserMetadata};
use crate::store::{IdentityStore, StoreError};

/// Sign-up errors.
#[derive(Debug, Error)]
pub enum SignupError {
    #[error("{0}")]
    MissingField(String),

    #[error("Invalid fields")]
    InvalidFields(Vec<FieldError>),

    #[error("A user with this {0} already exists")]
    Duplicate(&'static str),

    #[error("Password hashing error: {0}")]
    Password(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SignupError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(field) => SignupError::Duplicate(field),
            other => SignupError::Store(other),
        }
    }
}

/// Which identifiers sign-up insists on.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignupPolicy {
    pub require_email: bool,
    pub require_username: bool,
    pub require_phone: bool,
}

/// Sign-up input.
#[derive(Debug, Clone, Default)]
pub struct CreateUserOptions {
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub password: String,
    pub metadata: UserMetadata,
}

impl CreateUserOptions {
    /// Check presence rules first, then per-field rules.
    pub fn validate(&self, policy: &SignupPolicy) -> Result<(), SignupError> {
        if self.email.is_none() && self.username.is_none() {
            return Err(SignupError::MissingField(
                "Either email or username is required".into(),
            ));
        }
        for (required, value, name) in [
            (policy.require_email, &self.email, "email"),
            (policy.require_username, &self.username, "username"),
            (policy.require_phone, &self.phone, "phone"),
        ] {
            if required && value.is_none() {
                return Err(SignupError::MissingField(format!("The {name} field is required")));
            }
        }

        let mut v = Validator::new();
        if let Some(email) = &self.email {
            v.length("email", email, 1, 255).email("email", email);
        }
        if let Some(username) = &self.username {
            v.length("username", username, 3, 20);
        }
        if let Some(phone) = &self.phone {
            v.e164("phone", phone);
        }
        v.length("password", &self.password, 8, 255);
        v.finish().map_err(SignupError::InvalidFields)
    }
}

/// Validate, hash the password and insert the user.
pub async fn create_user(
    store: &dyn IdentityStore,
    policy: &SignupPolicy,
    options: CreateUserOptions,
) -> Result<User, SignupError> {
    options.validate(policy)?;

    if let Some(email) = &options.email
        && store.find_user_by_email(email).await?.is_some()
    {
        return Err(SignupError::Duplicate("email"));
    }
    if let Some(username) = &options.username
        && store.find_user_by_username(username).await?.is_some()
    {
        return Err(SignupError::Duplicate("username"));
    }
    if let Some(phone) = &options.phone
        && store.find_user_by_phone(phone).await?.is_some()
    {
        return Err(SignupError::Duplicate("phone"));
    }

    let password_hash = hash_password(&options.password).map_err(|e| match e {
        AuthError::Password(msg) => SignupError::Password(msg),
        other => SignupError::Password(other.to_string()),
    })?;

    // The uniqueness constraints still catch a concurrent sign-up.
    let mut tx = store.begin().await?;
    let user = tx
        .insert_user(NewUser {
            email: options.email,
            username: options.username,
            phone: options.phone,
            password_hash: Some(password_hash),
            metadata: options.metadata,
        })
        .await?;
    tx.commit().await?;

    info!(user_id = %user.id, "User signed up");
    Ok(user)
}

/// How a credential sign-in identifies the user.
#[derive(Debug, Clone, Copy)]
pub enum Login<'a> {
    Email(&'a str),
    Username(&'a str),
    Phone(&'a str),
}

/// Look up the user and check the password. Unknown users, users without a
/// password and wrong passwords are indistinguishable to the caller.
pub async fn authenticate(
    store: &dyn IdentityStore,
    login: Login<'_>,
    password: &str,
) -> Result<User, AuthError> {
    let user = match login {
        Login::Email(email) => store.find_user_by_email(email).await?,
        Login::Username(username) => store.find_user_by_username(username).await?,
        Login::Phone(phone) => store.find_user_by_phone(phone).await?,
    };
    let Some(user) = user else {
        return Err(AuthError::CredentialError);
    };
    let Some(hash) = user.password_hash.as_deref() else {
        return Err(AuthError::CredentialError);
    };
    if !verify_password(password, hash)? {
        return Err(AuthError::CredentialError);
    }
    store.record_sign_in(user.id, None).await?;
    Ok(user)
}
