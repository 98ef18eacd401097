//! Sign-up and token grant handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::AppState;
use crate::error::AppResult;
use crate::models::{AccessTokenResponse, SignUpResponse, parse_json};
use crate::services::auth::{self, GrantType};
use crate::services::cookies::set_token_cookies;

/// `POST /v1/sign_up/credentials`
pub async fn sign_up_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<SignUpResponse>> {
    let user = auth::sign_up(&state, parse_json(&body)?).await?;
    Ok(Json(SignUpResponse {
        id: user.id,
        created_at: user.created_at,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub grant_type: Option<String>,
    /// Browser-session cookies instead of persistent ones.
    #[serde(default)]
    pub session: Option<bool>,
}

/// `POST /v1/token?grant_type=credentials|refresh`
pub async fn token_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, Json<AccessTokenResponse>)> {
    let tokens = match GrantType::parse(query.grant_type.as_deref())? {
        GrantType::Credentials => auth::credentials_grant(&state, parse_json(&body)?).await?,
        GrantType::Refresh => auth::refresh_grant(&state, parse_json(&body)?).await?,
    };
    let jar = set_token_cookies(
        jar,
        &state.config.cookie,
        &tokens,
        query.session.unwrap_or(false),
    );
    Ok((jar, Json(AccessTokenResponse::from(&tokens))))
}
