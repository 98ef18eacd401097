//! # tollgate_api
//!
//! HTTP API library for Tollgate.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderName;
use axum::routing::{get, post};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use tollgate_core::auth::jwt::{TokenIssuer, TokenVerifier};
use tollgate_core::auth::refresh::RefreshEngine;
use tollgate_core::external::ProviderRegistry;
use tollgate_core::external::state::StateCodec;
use tollgate_core::keys::KeySet;
use tollgate_core::redirect::RedirectPolicy;
use tollgate_core::store::IdentityStore;

use crate::config::{ApiConfig, ConfigError};
use crate::handlers::{auth, external, health, jwks, user};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IdentityStore>,
    pub config: ApiConfig,
    pub keys: Arc<KeySet>,
    pub issuer: Arc<TokenIssuer>,
    pub verifier: Arc<TokenVerifier>,
    pub refresh: Arc<RefreshEngine>,
    /// Signs the OAuth `state` parameter with the shared secret.
    pub states: Arc<StateCodec>,
    pub providers: Arc<ProviderRegistry>,
    pub redirects: Arc<RedirectPolicy>,
}

impl AppState {
    /// Load keys, providers and the redirect policy from `config`.
    pub fn new(config: ApiConfig, store: Arc<dyn IdentityStore>) -> Result<Self, ConfigError> {
        let keys = Arc::new(KeySet::load(&config.jwt.keys)?);
        let issuer = Arc::new(TokenIssuer::new(keys.clone(), config.jwt.expires_after));
        let verifier = Arc::new(TokenVerifier::from_keys(keys.clone()));
        let refresh = Arc::new(RefreshEngine::new(store.clone(), issuer.clone()));
        let states = Arc::new(StateCodec::new(config.jwt.keys.secret.as_bytes()));
        let providers = Arc::new(ProviderRegistry::from_config(&config.external)?);
        let redirects = Arc::new(RedirectPolicy::new(
            &config.service_url,
            &config.uri_allow_list,
        )?);

        info!(
            keys = keys.keys().len(),
            providers = ?providers.names(),
            "Application state ready"
        );
        Ok(Self {
            store,
            config,
            keys,
            issuer,
            verifier,
            refresh,
            states,
            providers,
            redirects,
        })
    }
}

/// Run embedded database migrations.
///
/// Delegates to `tollgate_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tollgate_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let request_id = HeaderName::from_static(middleware::request_id::REQUEST_ID_HEADER);

    // Public routes (no auth required)
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/.well-known/jwks.json", get(jwks::jwks))
        .route("/v1/sign_up/credentials", post(auth::sign_up_handler))
        .route("/v1/token", post(auth::token_handler))
        .route("/v1/external", get(external::external_handler))
        .route(
            "/v1/external/callback",
            get(external::callback_handler).post(external::callback_handler),
        );

    // Protected routes (require auth)
    let protected = Router::new()
        .route("/v1/user", get(user::user_handler))
        .route("/v1/logout", post(user::logout_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .layer(axum::middleware::from_fn(
            middleware::request_id::scope_request_id,
        ))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}
