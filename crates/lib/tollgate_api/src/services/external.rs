//! OAuth2 external sign-in flow.
//!
//! `authorization_url` starts the flow. The callback runs in two phases:
//! [`load_callback_scope`] verifies the signed state and resolves the typed
//! request scope, then [`complete_callback`] exchanges the code, resolves the
//! local user and issues session tokens. Errors from the second phase are
//! rendered as a redirect back to the referrer.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;
use url::form_urlencoded;
use uuid::Uuid;

use tollgate_core::auth::refresh::IssuedTokens;
use tollgate_core::external::link::{ExternalAccount, LinkOutcome, link_identity};
use tollgate_core::external::{OAuthProvider, ProviderTokens};
use tollgate_core::models::auth::User;

use crate::AppState;
use crate::error::{AppError, AppResult, ErrorCode};

/// Inputs for starting an external sign-in.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeParams {
    pub provider: String,
    pub scopes: Vec<String>,
    /// Already checked against the redirect allow-list.
    pub referrer: String,
    pub linking_target: Option<Uuid>,
    /// Forwarded verbatim to the provider.
    pub extra_params: Vec<(String, String)>,
}

fn provider_for(state: &AppState, name: &str) -> AppResult<Arc<dyn OAuthProvider>> {
    state.providers.get(name).ok_or_else(|| {
        AppError::NotFound(
            ErrorCode::ProviderNotFound,
            format!("Unsupported provider {name:?}"),
        )
    })
}

/// Sign the state and build the provider's authorization URL.
pub async fn authorization_url(state: &AppState, params: AuthorizeParams) -> AppResult<Url> {
    let provider = provider_for(state, &params.provider)?;
    let signed = state.states.sign(
        provider.name(),
        Some(params.referrer.as_str()),
        params.linking_target,
    )?;
    let url = provider
        .authorization_url(&signed, &params.scopes, &params.extra_params)
        .await?;
    debug!(
        provider = provider.name(),
        linking = params.linking_target.is_some(),
        "Starting external sign-in"
    );
    Ok(url)
}

/// Query (or form) parameters of the provider callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Request scope of a callback whose state verified.
pub struct CallbackScope {
    pub provider: Arc<dyn OAuthProvider>,
    /// Where the browser goes next, success or failure.
    pub referrer: String,
    pub linking_target: Option<User>,
}

impl std::fmt::Debug for CallbackScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackScope")
            .field("provider", &self.provider.name())
            .field("referrer", &self.referrer)
            .field("linking_target", &self.linking_target.as_ref().map(|u| u.id))
            .finish()
    }
}

/// Verify the `state` parameter and load everything it refers to.
pub async fn load_callback_scope(
    state: &AppState,
    params: &CallbackParams,
) -> AppResult<CallbackScope> {
    let raw = params
        .state
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(ErrorCode::BadOAuth2Callback, "OAuth state parameter missing")
        })?;
    let claims = state.states.verify(raw)?;
    let provider = provider_for(state, &claims.provider)?;

    // The referrer was checked when the flow started; check again in case
    // the allow-list changed in between.
    let referrer = state.redirects.resolve([claims.referrer.as_deref()]);

    let linking_target = match claims.linking_target_id {
        Some(id) => Some(state.store.get_user(id).await?.ok_or_else(|| {
            AppError::Unprocessable(ErrorCode::UserNotFound, "Linking target user not found".into())
        })?),
        None => None,
    };

    Ok(CallbackScope {
        provider,
        referrer,
        linking_target,
    })
}

/// Result of a completed external sign-in.
#[derive(Debug, Clone)]
pub struct CallbackSuccess {
    pub tokens: IssuedTokens,
    pub provider_tokens: ProviderTokens,
    pub outcome: LinkOutcome,
}

/// Exchange the code, resolve the local user and issue session tokens.
pub async fn complete_callback(
    state: &AppState,
    scope: &CallbackScope,
    params: &CallbackParams,
) -> AppResult<CallbackSuccess> {
    let provider_name = scope.provider.name();

    if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
        let description = params.error_description.as_deref().unwrap_or_default();
        return Err(AppError::bad_request(
            ErrorCode::BadOAuth2Callback,
            format!("Provider returned {error}: {description}"),
        ));
    }
    let code = params
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(ErrorCode::BadOAuth2Callback, "OAuth code parameter missing")
        })?;

    let provider_tokens = scope.provider.exchange_code(code).await.map_err(|e| {
        AppError::Internal(format!("unable to exchange code with {provider_name}: {e}"))
    })?;
    let mut user_data = scope.provider.user_data(&provider_tokens).await.map_err(|e| {
        AppError::Internal(format!("user data from {provider_name}: {e}"))
    })?;
    if !user_data.promote_canonical_email() {
        return Err(AppError::Internal(format!(
            "{provider_name} returned no email for the account"
        )));
    }

    let (user, identity, outcome) = link_identity(
        state.store.as_ref(),
        ExternalAccount {
            provider: provider_name,
            user_data: &user_data,
            linking_target: scope.linking_target.as_ref(),
            auto_link_same_email: state.config.auth.auto_link_same_email,
        },
    )
    .await?;

    state.store.record_sign_in(user.id, Some(identity.id)).await?;
    let tokens = state.refresh.issue(&user).await?;
    info!(user_id = %user.id, provider = provider_name, "External sign-in");

    Ok(CallbackSuccess {
        tokens,
        provider_tokens,
        outcome,
    })
}

/// Referrer with provider tokens in the query and session tokens in the
/// fragment.
pub fn success_redirect(referrer: &str, success: &CallbackSuccess) -> AppResult<Url> {
    let mut url = Url::parse(referrer).map_err(|e| AppError::Internal(format!("referrer: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair(
            "provider_access_token",
            &success.provider_tokens.access_token,
        );
        if let Some(refresh) = success
            .provider_tokens
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
        {
            query.append_pair("provider_refresh_token", refresh);
        }
    }

    let tokens = &success.tokens;
    let fragment = form_urlencoded::Serializer::new(String::new())
        .append_pair("access_token", &tokens.access.token)
        .append_pair("expires_in", &tokens.access.expires_in.to_string())
        .append_pair("expires_at", &tokens.access.expires_at.to_string())
        .append_pair("refresh_token", &tokens.refresh_token)
        .append_pair("token_type", "bearer")
        .finish();
    url.set_fragment(Some(&fragment));
    Ok(url)
}

/// Referrer with the error in the fragment. Also logs the error.
pub fn error_redirect(referrer: &str, error: &AppError) -> String {
    let body = error.to_body();
    let kind = if error.status().is_server_error() {
        "server_error"
    } else {
        "invalid_request"
    };
    let mut fragment = form_urlencoded::Serializer::new(String::new());
    fragment
        .append_pair("error", kind)
        .append_pair("error_code", &body.error_code)
        .append_pair("error_description", &body.message);
    if let Some(error_id) = body.error_id {
        fragment.append_pair("error_id", &error_id);
    }

    match Url::parse(referrer) {
        Ok(mut url) => {
            url.set_fragment(Some(&fragment.finish()));
            url.into()
        }
        Err(_) => format!("{referrer}#{}", fragment.finish()),
    }
}
