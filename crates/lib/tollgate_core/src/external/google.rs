//! Google sign-in.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use url::Url;

use super::oidc::{OidcClient, map_id_token_claims};
use super::provider::{
    AuthorizationUrlBuilder, OAuthProvider, ProviderTokens, TokenExchanger, UserClaims, UserData,
    UserDataFetcher, UserEmail,
};
use super::{ProviderConfig, ProviderError};

pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

/// Used when Google's token response has no ID token.
pub const GOOGLE_USER_INFO_URL: &str = "https://www.googleapis.com/userinfo/v2/me";

const DEFAULT_SCOPES: [&str; 2] = ["email", "profile"];

/// Query parameters the provider sets itself; forwarded extras cannot override them.
const RESERVED_PARAMS: [&str; 5] = ["client_id", "redirect_uri", "response_type", "scope", "state"];

/// Google account as seen in ID tokens and the v2 user-info endpoint.
#[derive(Debug, Default, Deserialize)]
struct GoogleUser {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    hd: Option<String>,
}

impl GoogleUser {
    fn is_email_verified(&self) -> bool {
        self.verified_email || self.email_verified
    }

    fn emails(&self) -> Vec<UserEmail> {
        self.email
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(|email| UserEmail {
                email: email.to_string(),
                verified: self.is_email_verified(),
                primary: true,
            })
            .into_iter()
            .collect()
    }
}

/// Map verified Google ID-token claims. The hosted domain (`hd`) is kept as a
/// custom claim.
pub fn map_google_claims(claims: Value) -> Result<UserData, ProviderError> {
    let user: GoogleUser = serde_json::from_value(claims)
        .map_err(|e| ProviderError::UserData(format!("unreadable Google claims: {e}")))?;

    let mut custom_claims = BTreeMap::new();
    if let Some(hd) = user.hd.clone().filter(|hd| !hd.is_empty()) {
        custom_claims.insert("hd".to_string(), Value::String(hd));
    }
    Ok(UserData {
        emails: user.emails(),
        claims: UserClaims {
            iss: user.iss.clone(),
            sub: user.sub.clone(),
            name: user.name.clone(),
            given_name: user.given_name.clone(),
            family_name: user.family_name.clone(),
            picture: user.picture.clone(),
            email: user.email.clone(),
            email_verified: user.is_email_verified(),
            custom_claims,
            ..UserClaims::default()
        },
    })
}

/// Google as an [`OAuthProvider`].
#[derive(Debug)]
pub struct GoogleProvider {
    config: ProviderConfig,
    oidc: OidcClient,
    user_info_url: String,
}

impl GoogleProvider {
    /// `config.url` overrides the issuer, `config.api_url` the user-info URL.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        let issuer = config
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| GOOGLE_ISSUER.to_string());
        let user_info_url = config
            .api_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| GOOGLE_USER_INFO_URL.to_string());
        Ok(Self {
            oidc: OidcClient::new(&issuer)?,
            config,
            user_info_url,
        })
    }

    async fn legacy_user_data(&self, access_token: &str) -> Result<UserData, ProviderError> {
        info!("Using Google user info endpoint, no ID token was returned");
        let user: GoogleUser = self
            .oidc
            .get_json(&self.user_info_url, Some(access_token))
            .await?;
        Ok(UserData {
            emails: user.emails(),
            claims: UserClaims {
                iss: Some(self.user_info_url.clone()),
                sub: user.id.clone(),
                name: user.name.clone(),
                given_name: user.given_name.clone(),
                family_name: user.family_name.clone(),
                picture: user.picture.clone(),
                email: user.email.clone(),
                email_verified: user.is_email_verified(),
                ..UserClaims::default()
            },
        })
    }
}

#[async_trait]
impl AuthorizationUrlBuilder for GoogleProvider {
    async fn authorization_url(
        &self,
        state: &str,
        scopes: &[String],
        extra_params: &[(String, String)],
    ) -> Result<Url, ProviderError> {
        let endpoint = &self.oidc.discovery().await?.authorization_endpoint;
        let mut url = Url::parse(endpoint)
            .map_err(|e| ProviderError::Config(format!("bad authorization endpoint: {e}")))?;

        let mut all_scopes: Vec<&str> = DEFAULT_SCOPES.to_vec();
        for scope in scopes.iter().map(|s| s.trim()) {
            if !scope.is_empty() && !all_scopes.contains(&scope) {
                all_scopes.push(scope);
            }
        }

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", self.config.primary_client_id())
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", &all_scopes.join(" "))
                .append_pair("state", state);
            for (key, value) in extra_params {
                if !RESERVED_PARAMS.contains(&key.as_str()) {
                    query.append_pair(key, value);
                }
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl TokenExchanger for GoogleProvider {
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ProviderError> {
        self.oidc.exchange_code(&self.config, code).await
    }
}

#[async_trait]
impl UserDataFetcher for GoogleProvider {
    async fn user_data(&self, tokens: &ProviderTokens) -> Result<UserData, ProviderError> {
        match tokens.id_token.as_deref().filter(|t| !t.is_empty()) {
            Some(id_token) => {
                let claims = self
                    .oidc
                    .verify_id_token(id_token, &self.config.client_id, Some(&tokens.access_token))
                    .await?;
                map_id_token_claims(claims)
            }
            None => self.legacy_user_data(&tokens.access_token).await,
        }
    }
}

impl OAuthProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }
}
