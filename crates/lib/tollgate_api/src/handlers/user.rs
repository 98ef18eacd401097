//! Handlers for the authenticated caller.

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum_extra::extract::cookie::CookieJar;

use crate::AppState;
use crate::error::{AppError, AppResult, ErrorCode};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::UserResponse;
use crate::services::cookies::clear_token_cookies;

fn subject(user: &AuthenticatedUser) -> AppResult<uuid::Uuid> {
    user.0.user_id().ok_or_else(|| {
        AppError::bad_request(ErrorCode::BadJwt, "Token subject is not a user id")
    })
}

/// `GET /v1/user`
pub async fn user_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
) -> AppResult<Json<UserResponse>> {
    let user = state
        .store
        .get_user(subject(&caller)?)
        .await?
        .ok_or_else(|| AppError::Forbidden(ErrorCode::UserNotFound, "User not found".into()))?;
    Ok(Json(UserResponse::from(&user)))
}

/// `POST /v1/logout`: revokes every refresh token of the caller.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    jar: CookieJar,
) -> AppResult<(StatusCode, CookieJar)> {
    state.refresh.revoke_all(subject(&caller)?).await?;
    let jar = clear_token_cookies(jar, &state.config.cookie);
    Ok((StatusCode::NO_CONTENT, jar))
}
