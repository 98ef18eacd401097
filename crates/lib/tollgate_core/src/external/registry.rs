//! Name → provider lookup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::google::GoogleProvider;
use super::provider::OAuthProvider;
use super::{ExternalConfig, ProviderError};

/// Enabled providers, keyed by lower-case name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every enabled provider. An enabled but incomplete provider is
    /// a configuration error.
    pub fn from_config(config: &ExternalConfig) -> Result<Self, ProviderError> {
        let mut registry = Self::new();
        if config.google.enabled {
            registry.register(Arc::new(GoogleProvider::new(config.google.clone())?));
        }
        info!(providers = ?registry.names(), "External providers registered");
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers
            .insert(provider.name().to_lowercase(), provider);
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<Arc<dyn OAuthProvider>> {
        self.providers.get(&name.to_lowercase()).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ProviderConfig;

    #[test]
    fn disabled_providers_are_not_registered() {
        let registry = ProviderRegistry::from_config(&ExternalConfig::default()).unwrap();
        assert!(registry.get("google").is_none());
    }

    #[test]
    fn enabled_provider_is_found_case_insensitively() {
        let config = ExternalConfig {
            google: ProviderConfig {
                client_id: vec!["client".into()],
                client_secret: "secret".into(),
                redirect_uri: "https://auth.example.com/v1/external/callback".into(),
                enabled: true,
                ..ProviderConfig::default()
            },
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.get("Google").unwrap().name(), "google");
        assert_eq!(registry.names(), vec!["google".to_string()]);
    }

    #[test]
    fn enabled_but_incomplete_provider_fails() {
        let config = ExternalConfig {
            google: ProviderConfig {
                enabled: true,
                ..ProviderConfig::default()
            },
        };
        assert!(ProviderRegistry::from_config(&config).is_err());
    }
}
