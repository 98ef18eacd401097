//! External OAuth2 sign-in handlers.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_TYPE, LOCATION, REFERER};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use url::form_urlencoded;

use crate::AppState;
use crate::error::{AppError, AppResult, ErrorCode};
use crate::middleware::auth::authenticate;
use crate::services::cookies::set_token_cookies;
use crate::services::external::{
    AuthorizeParams, CallbackParams, authorization_url, complete_callback, error_redirect,
    load_callback_scope, success_redirect,
};

/// Query keys consumed here; everything else goes to the provider.
const RESERVED_PARAMS: [&str; 5] = ["provider", "scopes", "redirect_to", "link", "no_redirect"];

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

fn is_true(value: Option<&str>) -> bool {
    matches!(
        value.map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "true" | "yes")
    )
}

/// `GET /v1/external?provider=&scopes=&redirect_to=`
///
/// Redirects to the provider, or with `no_redirect=true` returns the URL as
/// plain text. With `link=true` the bearer caller becomes the linking target.
pub async fn external_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
) -> AppResult<Response> {
    let get = |key: &str| {
        query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let provider = get("provider")
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::NotFound(ErrorCode::ProviderNotFound, "No provider given".into()))?;
    let scopes = get("scopes")
        .unwrap_or_default()
        .split([',', ' '])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let referrer = state.redirects.resolve([
        headers.get("redirect_to").and_then(|v| v.to_str().ok()),
        get("redirect_to"),
        headers.get(REFERER).and_then(|v| v.to_str().ok()),
    ]);

    let linking_target = if is_true(get("link")) {
        let claims = authenticate(&state, &headers)?;
        Some(claims.user_id().ok_or_else(|| {
            AppError::bad_request(ErrorCode::BadJwt, "Token subject is not a user id")
        })?)
    } else {
        None
    };

    let extra_params = query
        .iter()
        .filter(|(k, _)| !RESERVED_PARAMS.contains(&k.as_str()))
        .cloned()
        .collect();

    let url = authorization_url(
        &state,
        AuthorizeParams {
            provider: provider.to_string(),
            scopes,
            referrer,
            linking_target,
            extra_params,
        },
    )
    .await?;

    if is_true(get("no_redirect")) {
        return Ok(([(CONTENT_TYPE, "text/plain")], url.to_string()).into_response());
    }
    Ok(found(url.as_str()))
}

/// Fill callback parameters missing from the query with form-post values.
fn merge_form(mut params: CallbackParams, body: &[u8]) -> CallbackParams {
    for (key, value) in form_urlencoded::parse(body) {
        let slot = match key.as_ref() {
            "state" => &mut params.state,
            "code" => &mut params.code,
            "error" => &mut params.error,
            "error_description" => &mut params.error_description,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }
    params
}

/// `GET|POST /v1/external/callback`
///
/// A state that does not verify yields a JSON error. Once the state is
/// trusted, every outcome is a redirect to its referrer.
pub async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let params = merge_form(params, &body);

    let scope = match load_callback_scope(&state, &params).await {
        Ok(scope) => scope,
        Err(err) => return err.into_response(),
    };

    let redirect = complete_callback(&state, &scope, &params)
        .await
        .and_then(|success| Ok((success_redirect(&scope.referrer, &success)?, success)));
    match redirect {
        Ok((url, success)) => {
            let jar = set_token_cookies(jar, &state.config.cookie, &success.tokens, false);
            (jar, found(url.as_str())).into_response()
        }
        Err(err) => found(&error_redirect(&scope.referrer, &err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_values_fill_gaps_only() {
        let params = CallbackParams {
            state: Some("from-query".into()),
            ..CallbackParams::default()
        };
        let merged = merge_form(params, b"state=from-form&code=abc&other=1");
        assert_eq!(merged.state.as_deref(), Some("from-query"));
        assert_eq!(merged.code.as_deref(), Some("abc"));
        assert!(merged.error.is_none());
    }

    #[test]
    fn truthy_flags() {
        assert!(is_true(Some("true")));
        assert!(is_true(Some("TRUE")));
        assert!(is_true(Some("1")));
        assert!(!is_true(Some("false")));
        assert!(!is_true(None));
    }
}
