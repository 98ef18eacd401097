//! External OAuth2/OIDC sign-in.
//!
//! Providers implement the capability traits in [`provider`]; the registry
//! maps names to configured providers. OAuth `state` is a short-lived signed
//! token ([`state`]) so the callback needs no server-side session.

pub mod google;
pub mod link;
pub mod oidc;
pub mod provider;
pub mod registry;
pub mod state;

use serde::Deserialize;
use thiserror::Error;

pub use provider::{OAuthProvider, ProviderTokens, UserClaims, UserData, UserEmail};
pub use registry::ProviderRegistry;

/// Provider errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider configuration error: {0}")]
    Config(String),

    #[error("Provider request failed: {0}")]
    Http(String),

    #[error("Code exchange failed: {0}")]
    Exchange(String),

    #[error("Invalid ID token: {0}")]
    IdToken(String),

    #[error("Unusable provider user data: {0}")]
    UserData(String),
}

/// Settings for one OAuth provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    /// Accepted client ids. The first is used for authorization requests;
    /// ID tokens may be addressed to any of them.
    #[serde(default)]
    pub client_id: Vec<String>,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    /// Overrides the provider's issuer/discovery base URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Overrides the provider's user-info endpoint.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), ProviderError> {
        if !self.enabled {
            return Err(ProviderError::Config("provider is not enabled".into()));
        }
        if self.client_id.iter().all(|id| id.is_empty()) {
            return Err(ProviderError::Config("missing OAuth client id".into()));
        }
        if self.client_secret.is_empty() {
            return Err(ProviderError::Config("missing OAuth secret".into()));
        }
        if self.redirect_uri.is_empty() {
            return Err(ProviderError::Config("missing redirect URI".into()));
        }
        Ok(())
    }

    pub(crate) fn primary_client_id(&self) -> &str {
        self.client_id
            .iter()
            .find(|id| !id.is_empty())
            .map_or("", String::as_str)
    }
}

/// Configured external providers.
#[derive(Debug, Clone, Default)]
pub struct ExternalConfig {
    pub google: ProviderConfig,
}
