//! Liveness check.

use axum::Json;

use crate::models::HealthResponse;

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        name: "tollgate".into(),
        version: tollgate_core::version().to_string(),
    })
}
