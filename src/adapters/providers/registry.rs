//! Provider registry: resolves provider names to shared instances.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ProviderConfig;
use crate::domain::ports::ExecutionProvider;

use super::anthropic_api::{self, AnthropicApiConfig, AnthropicApiProvider};
use super::claude_cli::{self, ClaudeCliConfig, ClaudeCliProvider};
use super::mock::{self, MockProvider};

/// Registry of available execution providers.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ExecutionProvider>>,
    default_name: String,
}

impl ProviderRegistry {
    /// Empty registry whose default is `default_name`.
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_name: default_name.into(),
        }
    }

    /// Build the standard providers from configuration.
    pub fn from_config(config: &ProviderConfig) -> DomainResult<Self> {
        let api = AnthropicApiProvider::new(AnthropicApiConfig::from_settings(
            &config.anthropic,
            config.max_tokens,
        ))?;
        let cli = ClaudeCliProvider::new(ClaudeCliConfig::from(&config.claude_cli));

        let registry = Self::new(config.default.clone())
            .with_provider(anthropic_api::PROVIDER_NAME, Arc::new(api))
            .with_provider(claude_cli::PROVIDER_NAME, Arc::new(cli))
            .with_provider(mock::PROVIDER_NAME, Arc::new(MockProvider::new()));

        if !registry.providers.contains_key(&registry.default_name) {
            return Err(DomainError::ConfigError(format!(
                "Unknown default provider '{}'",
                registry.default_name
            )));
        }
        Ok(registry)
    }

    /// Register a provider under `name`.
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn ExecutionProvider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    /// Replace every provider with `wrap(name, provider)`.
    pub fn wrap_all<F>(mut self, mut wrap: F) -> Self
    where
        F: FnMut(&str, Arc<dyn ExecutionProvider>) -> Arc<dyn ExecutionProvider>,
    {
        self.providers = self
            .providers
            .into_iter()
            .map(|(name, provider)| {
                let wrapped = wrap(&name, provider);
                (name, wrapped)
            })
            .collect();
        self
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> DomainResult<Arc<dyn ExecutionProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::ConfigError(format!("Unknown provider '{name}'")))
    }

    /// Provider named by `name`, or the default when `None`.
    pub fn resolve(&self, name: Option<&str>) -> DomainResult<Arc<dyn ExecutionProvider>> {
        self.get(name.unwrap_or(&self.default_name))
    }

    /// The provider named as default.
    pub fn default_provider(&self) -> DomainResult<Arc<dyn ExecutionProvider>> {
        self.get(&self.default_name)
    }

    /// Name of the default provider.
    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Registered names, sorted.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_registers_builtin_providers() {
        let registry = ProviderRegistry::from_config(&ProviderConfig::default()).unwrap();
        assert_eq!(registry.available(), vec!["anthropic-api", "claude-cli", "mock"]);
        assert_eq!(registry.default_provider().unwrap().name(), "anthropic-api");
        assert_eq!(registry.resolve(Some("claude-cli")).unwrap().name(), "claude-cli");
        assert!(registry.get("nope").is_err());
    }

    #[test]
    fn test_unknown_default_is_rejected() {
        let config = ProviderConfig {
            default: "gpt".to_string(),
            ..ProviderConfig::default()
        };
        assert!(matches!(
            ProviderRegistry::from_config(&config),
            Err(DomainError::ConfigError(_))
        ));
    }

    #[test]
    fn test_custom_provider_overrides() {
        let registry = ProviderRegistry::new("mock").with_provider("mock", Arc::new(MockProvider::new()));
        assert_eq!(registry.default_provider().unwrap().name(), "mock");
    }
}
