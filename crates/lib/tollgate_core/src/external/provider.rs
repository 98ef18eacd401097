//! Provider capability traits and the normalized user data they produce.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::ProviderError;

/// Tokens returned by a provider's token endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// An email address reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEmail {
    pub email: String,
    pub verified: bool,
    pub primary: bool,
}

/// Standard OIDC profile claims plus provider-specific extras.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoneinfo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub phone_verified: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_claims: BTreeMap<String, serde_json::Value>,
}

/// What a provider tells us about the signed-in account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub emails: Vec<UserEmail>,
    pub claims: UserClaims,
}

impl UserData {
    /// The primary email, or the first one when none is marked primary.
    pub fn canonical_email(&self) -> Option<&UserEmail> {
        self.emails
            .iter()
            .find(|e| e.primary)
            .or_else(|| self.emails.first())
    }

    /// Copy the canonical email and its verified flag into the claims.
    /// Returns `false` when the provider reported no email at all.
    pub fn promote_canonical_email(&mut self) -> bool {
        let Some(canonical) = self.canonical_email().cloned() else {
            return false;
        };
        self.claims.email = Some(canonical.email);
        self.claims.email_verified = canonical.verified;
        true
    }

    /// Provider-side account id.
    pub fn subject(&self) -> Option<&str> {
        self.claims.sub.as_deref().filter(|s| !s.is_empty())
    }
}

/// Builds the URL the browser is sent to for consent.
#[async_trait]
pub trait AuthorizationUrlBuilder: Send + Sync {
    async fn authorization_url(
        &self,
        state: &str,
        scopes: &[String],
        extra_params: &[(String, String)],
    ) -> Result<Url, ProviderError>;
}

/// Trades an authorization code for tokens.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ProviderError>;
}

/// Turns provider tokens into normalized user data.
#[async_trait]
pub trait UserDataFetcher: Send + Sync {
    async fn user_data(&self, tokens: &ProviderTokens) -> Result<UserData, ProviderError>;
}

/// A complete OAuth2 provider.
pub trait OAuthProvider: AuthorizationUrlBuilder + TokenExchanger + UserDataFetcher {
    fn name(&self) -> &str;
}
