//! Authentication service: sign-up and token grants over `tollgate_core`.

use tracing::info;

use tollgate_core::auth::refresh::IssuedTokens;
use tollgate_core::auth::users::{self, CreateUserOptions, Login};
use tollgate_core::models::auth::User;

use crate::AppState;
use crate::error::{AppError, AppResult, ErrorCode};
use crate::models::{CredentialsGrant, RefreshGrant, SignUpRequest};

/// Supported `grant_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    Credentials,
    Refresh,
}

impl GrantType {
    pub fn parse(value: Option<&str>) -> AppResult<Self> {
        match value {
            Some("credentials") => Ok(GrantType::Credentials),
            Some("refresh") => Ok(GrantType::Refresh),
            other => Err(AppError::bad_request(
                ErrorCode::InvalidGrantType,
                format!("Unsupported grant_type {:?}", other.unwrap_or_default()),
            )),
        }
    }
}

/// Create a password user.
pub async fn sign_up(state: &AppState, request: SignUpRequest) -> AppResult<User> {
    let options = CreateUserOptions {
        email: request.email,
        username: request.username,
        phone: request.phone,
        password: request.password,
        metadata: request.metadata.unwrap_or_default(),
    };
    let user = users::create_user(state.store.as_ref(), &state.config.auth.signup, options).await?;
    Ok(user)
}

/// Pick the login channel; exactly one identifier must be present and its
/// channel must be enabled.
fn login_for<'a>(state: &AppState, grant: &'a CredentialsGrant) -> AppResult<Login<'a>> {
    let auth = &state.config.auth;
    let login = match (
        grant.email.as_deref(),
        grant.username.as_deref(),
        grant.phone.as_deref(),
    ) {
        (Some(email), None, None) => Login::Email(email),
        (None, Some(username), None) => Login::Username(username),
        (None, None, Some(phone)) => Login::Phone(phone),
        _ => {
            return Err(AppError::bad_request(
                ErrorCode::InvalidJson,
                "Exactly one of email, username or phone is required",
            ));
        }
    };
    let disabled = match login {
        Login::Email(_) => auth.disable_email_auth.then_some("email"),
        Login::Username(_) => auth.disable_username_auth.then_some("username"),
        Login::Phone(_) => auth.disable_phone_auth.then_some("phone"),
    };
    if let Some(channel) = disabled {
        return Err(AppError::Unprocessable(
            ErrorCode::DisabledGrantType,
            format!("Sign-in with {channel} is disabled"),
        ));
    }
    Ok(login)
}

/// `grant_type=credentials`.
pub async fn credentials_grant(state: &AppState, grant: CredentialsGrant) -> AppResult<IssuedTokens> {
    let login = login_for(state, &grant)?;
    let user = users::authenticate(state.store.as_ref(), login, &grant.password).await?;
    let tokens = state.refresh.issue(&user).await?;
    info!(user_id = %user.id, "Credential sign-in");
    Ok(tokens)
}

/// `grant_type=refresh`.
pub async fn refresh_grant(state: &AppState, grant: RefreshGrant) -> AppResult<IssuedTokens> {
    if grant.refresh_token.trim().is_empty() {
        return Err(AppError::bad_request(
            ErrorCode::InvalidField,
            "refresh_token must not be empty",
        ));
    }
    Ok(state.refresh.rotate(&grant.refresh_token).await?)
}
