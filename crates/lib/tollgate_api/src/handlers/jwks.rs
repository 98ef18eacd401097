//! Public verification keys.

use axum::Json;
use axum::extract::State;
use axum::http::header::CACHE_CONTROL;
use axum::response::IntoResponse;

use crate::AppState;

/// `GET /.well-known/jwks.json`: asymmetric verification keys only.
pub async fn jwks(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CACHE_CONTROL, "public, max-age=600")],
        Json(state.keys.public_jwks()),
    )
}
