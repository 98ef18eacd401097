//! Cookie service: set and clear the httpOnly session cookies.
//!
//! Cookie names are `<key>-access-token` and `<key>-refresh-token`.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::{Duration, OffsetDateTime};

use crate::config::CookieConfig;
use tollgate_core::auth::refresh::IssuedTokens;

pub fn access_cookie_name(config: &CookieConfig) -> String {
    format!("{}-access-token", config.key)
}

pub fn refresh_cookie_name(config: &CookieConfig) -> String {
    format!("{}-refresh-token", config.key)
}

fn base_cookie(config: &CookieConfig, name: String, value: String) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    if let Some(domain) = &config.domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

/// Build one session cookie. Session cookies carry neither `Max-Age` nor
/// `Expires` and die with the browser session.
pub fn session_cookie(
    config: &CookieConfig,
    name: String,
    value: &str,
    session: bool,
) -> Cookie<'static> {
    let mut cookie = base_cookie(config, name, value.to_string());
    if !session {
        cookie.set_max_age(Duration::seconds(config.duration));
        cookie.set_expires(OffsetDateTime::now_utc() + Duration::seconds(config.duration));
    }
    cookie
}

/// An emptied cookie that tells the browser to drop `name` immediately.
pub fn cleared_cookie(config: &CookieConfig, name: String) -> Cookie<'static> {
    let mut cookie = base_cookie(config, name, String::new());
    cookie.set_max_age(Duration::seconds(-1));
    cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
    cookie
}

/// Add the access and refresh cookies for a token pair.
pub fn set_token_cookies(
    jar: CookieJar,
    config: &CookieConfig,
    tokens: &IssuedTokens,
    session: bool,
) -> CookieJar {
    jar.add(session_cookie(
        config,
        access_cookie_name(config),
        &tokens.access.token,
        session,
    ))
    .add(session_cookie(
        config,
        refresh_cookie_name(config),
        &tokens.refresh_token,
        session,
    ))
}

/// Add cleared versions of both session cookies.
pub fn clear_token_cookies(jar: CookieJar, config: &CookieConfig) -> CookieJar {
    jar.add(cleared_cookie(config, access_cookie_name(config)))
        .add(cleared_cookie(config, refresh_cookie_name(config)))
}
