//! Request and response bodies.

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tollgate_core::auth::refresh::IssuedTokens;
use tollgate_core::models::auth::{User, UserMetadata};

use crate::error::{AppError, ErrorCode};

/// Canonical error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status.
    pub code: u16,
    pub error_code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
}

/// Public view of a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub metadata: UserMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sign_in: Option<DateTime<Utc>>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            phone: user.phone.clone(),
            metadata: user.metadata.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_sign_in: user.last_sign_in,
        }
    }
}

/// Body of a successful token grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub expires_at: i64,
    pub user: UserResponse,
}

impl From<&IssuedTokens> for AccessTokenResponse {
    fn from(tokens: &IssuedTokens) -> Self {
        Self {
            access_token: tokens.access.token.clone(),
            token_type: "bearer".into(),
            refresh_token: tokens.refresh_token.clone(),
            expires_in: tokens.access.expires_in,
            expires_at: tokens.access.expires_at,
            user: UserResponse::from(&tokens.user),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignUpRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
    #[serde(default)]
    pub metadata: Option<UserMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// `grant_type=credentials` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsGrant {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
}

/// `grant_type=refresh` body.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshGrant {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub name: String,
    pub version: String,
}

/// Parses a JSON body, mapping any failure to `400 invalid_json`.
pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request(ErrorCode::InvalidJson, format!("Invalid JSON: {e}")))
}
