//! Application error types.
//!
//! Every core error is translated here into one canonical JSON body:
//! `{code, error_code, message, details?, error_id?}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, info, warn};

use tollgate_core::auth::AuthError;
use tollgate_core::auth::jwt::TokenError;
use tollgate_core::auth::refresh::RefreshError;
use tollgate_core::auth::users::SignupError;
use tollgate_core::auth::validation::FieldError;
use tollgate_core::external::ProviderError;
use tollgate_core::external::link::LinkError;
use tollgate_core::external::state::StateError;
use tollgate_core::keys::KeyError;
use tollgate_core::store::StoreError;

use crate::middleware::request_id::current_request_id;
use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnexpectedFailure,
    InvalidJson,
    MissingField,
    InvalidField,
    InvalidCredentials,
    Conflict,
    InvalidGrantType,
    DisabledGrantType,
    ProviderNotFound,
    BadOAuth2State,
    BadOAuth2Callback,
    UserNotFound,
    NoAuthorization,
    BadJwt,
    RefreshTokenNotFound,
    RefreshTokenRevoked,
    IdentityAlreadyExists,
    RateLimited,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnexpectedFailure => "unexpected_failure",
            ErrorCode::InvalidJson => "invalid_json",
            ErrorCode::MissingField => "missing_field",
            ErrorCode::InvalidField => "invalid_field",
            ErrorCode::InvalidCredentials => "invalid_credentials",
            ErrorCode::Conflict => "conflict",
            ErrorCode::InvalidGrantType => "invalid_grant_type",
            ErrorCode::DisabledGrantType => "disabled_grant_type",
            ErrorCode::ProviderNotFound => "provider_not_found",
            ErrorCode::BadOAuth2State => "bad_oauth2_state",
            ErrorCode::BadOAuth2Callback => "bad_oauth2_callback",
            ErrorCode::UserNotFound => "user_not_found",
            ErrorCode::NoAuthorization => "no_authorization",
            ErrorCode::BadJwt => "bad_jwt",
            ErrorCode::RefreshTokenNotFound => "refresh_token_not_found",
            ErrorCode::RefreshTokenRevoked => "refresh_token_revoked",
            ErrorCode::IdentityAlreadyExists => "identity_already_exists",
            ErrorCode::RateLimited => "rate_limited",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{1}")]
    BadRequest(ErrorCode, String),

    #[error("One or more fields are invalid")]
    InvalidFields(Vec<FieldError>),

    #[error("{1}")]
    Unauthorized(ErrorCode, String),

    #[error("{1}")]
    Forbidden(ErrorCode, String),

    #[error("{1}")]
    NotFound(ErrorCode, String),

    #[error("{1}")]
    Conflict(ErrorCode, String),

    #[error("{1}")]
    Unprocessable(ErrorCode, String),

    #[error("{0}")]
    TooManyRequests(String),

    /// The cause is logged, never rendered.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        AppError::Internal(cause.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(..) | AppError::InvalidFields(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(..) => StatusCode::FORBIDDEN,
            AppError::NotFound(..) => StatusCode::NOT_FOUND,
            AppError::Conflict(..) => StatusCode::CONFLICT,
            AppError::Unprocessable(..) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(code, _)
            | AppError::Unauthorized(code, _)
            | AppError::Forbidden(code, _)
            | AppError::NotFound(code, _)
            | AppError::Conflict(code, _)
            | AppError::Unprocessable(code, _) => *code,
            AppError::InvalidFields(_) => ErrorCode::InvalidField,
            AppError::TooManyRequests(_) => ErrorCode::RateLimited,
            AppError::Internal(_) => ErrorCode::UnexpectedFailure,
        }
    }

    /// Logs the error and renders its body. Internal errors carry the
    /// request id as `error_id`, or a fresh uuidv7 outside a request.
    pub fn to_body(&self) -> ErrorResponse {
        let status = self.status();
        let code = self.code();
        let mut body = ErrorResponse {
            code: status.as_u16(),
            error_code: code.as_str().to_string(),
            message: self.to_string(),
            details: None,
            error_id: None,
        };

        match self {
            AppError::Internal(cause) => {
                let error_id = current_request_id()
                    .unwrap_or_else(|| tollgate_core::uuid::uuidv7().to_string());
                error!(%error_id, cause = %cause, "Unexpected failure");
                body.message = "Unexpected failure, please try again later".into();
                body.error_id = Some(error_id);
            }
            AppError::TooManyRequests(_) => {
                warn!(error_code = %code, "Request rate limited");
            }
            AppError::InvalidFields(fields) => {
                info!(status = status.as_u16(), error_code = %code, "Request failed");
                body.details = serde_json::to_value(fields).ok();
            }
            _ => {
                info!(status = status.as_u16(), error_code = %code, message = %body.message, "Request failed");
            }
        }
        body
    }

    pub fn bad_request(code: ErrorCode, message: impl Into<String>) -> Self {
        AppError::BadRequest(code, message.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}

// ============================================================================
// Core error translation
// ============================================================================

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(field) => AppError::Conflict(
                ErrorCode::Conflict,
                format!("A user with this {field} already exists"),
            ),
            other => AppError::internal(other),
        }
    }
}

impl From<KeyError> for AppError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::BadToken(msg) => AppError::Forbidden(ErrorCode::BadJwt, msg),
            other => AppError::internal(other),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid(msg) => AppError::Forbidden(ErrorCode::BadJwt, msg),
            other => AppError::internal(other),
        }
    }
}

impl From<RefreshError> for AppError {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::NotFound => AppError::NotFound(
                ErrorCode::RefreshTokenNotFound,
                "Refresh token not found".into(),
            ),
            RefreshError::Revoked => AppError::Forbidden(
                ErrorCode::RefreshTokenRevoked,
                "Refresh token has been revoked".into(),
            ),
            RefreshError::UserNotFound => {
                AppError::NotFound(ErrorCode::UserNotFound, "User not found".into())
            }
            RefreshError::Token(e) => e.into(),
            RefreshError::Store(e) => e.into(),
        }
    }
}

impl From<SignupError> for AppError {
    fn from(e: SignupError) -> Self {
        match e {
            SignupError::MissingField(msg) => AppError::BadRequest(ErrorCode::MissingField, msg),
            SignupError::InvalidFields(fields) => AppError::InvalidFields(fields),
            SignupError::Duplicate(field) => AppError::Conflict(
                ErrorCode::Conflict,
                format!("A user with this {field} already exists"),
            ),
            SignupError::Password(msg) => AppError::Internal(msg),
            SignupError::Store(e) => e.into(),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::CredentialError => AppError::Unauthorized(
                ErrorCode::InvalidCredentials,
                "Invalid credentials".into(),
            ),
            AuthError::Password(msg) => AppError::Internal(msg),
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<StateError> for AppError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Invalid(msg) => AppError::BadRequest(ErrorCode::BadOAuth2State, msg),
            StateError::Signing(msg) => AppError::Internal(msg),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        AppError::internal(e)
    }
}

impl From<LinkError> for AppError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::IdentityTaken => AppError::Conflict(
                ErrorCode::IdentityAlreadyExists,
                "This identity is already linked to another user".into(),
            ),
            LinkError::EmailTaken => AppError::Conflict(
                ErrorCode::Conflict,
                "A user with this email already exists".into(),
            ),
            LinkError::Store(e) => e.into(),
            other => AppError::internal(other),
        }
    }
}
