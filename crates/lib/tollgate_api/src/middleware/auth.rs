//! Authentication middleware: Bearer token extraction and JWT verification.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;

use tollgate_core::models::auth::AccessTokenClaims;

use crate::AppState;
use crate::error::{AppError, ErrorCode};
use crate::services::cookies::clear_token_cookies;

/// Verified claims of the caller, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AccessTokenClaims);

/// Extract the token from `Authorization: Bearer <token>`. The scheme is
/// matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let no_auth = || {
        AppError::Unauthorized(
            ErrorCode::NoAuthorization,
            "This endpoint requires a Bearer token".into(),
        )
    };
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(no_auth)?;
    let (scheme, token) = value.trim().split_once(' ').ok_or_else(no_auth)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(' ') {
        return Err(no_auth());
    }
    Ok(token)
}

/// Verify the bearer token in `headers`.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AccessTokenClaims, AppError> {
    let token = bearer_token(headers)?;
    Ok(state.verifier.verify(token)?)
}

/// Axum middleware: verifies the bearer token and injects
/// [`AuthenticatedUser`]. Any failure also clears the session cookies.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&state, request.headers()) {
        Ok(claims) => {
            request.extensions_mut().insert(AuthenticatedUser(claims));
            next.run(request).await
        }
        Err(err) => {
            let jar = clear_token_cookies(CookieJar::new(), &state.config.cookie);
            (jar, err).into_response()
        }
    }
}
