//! LLM provider adapters
//!
//! ## Architecture
//!
//! Real backends go through the `genai` crate, which handles:
//! - Streaming parsing per vendor protocol
//! - Tool-call capture
//!
//! Each `GenaiAdapter` is bound to one backend (Gemini, Ollama, OpenAI,
//! Anthropic) through a forced adapter kind, with auth from our `SecretStore`.
//! Tool schemas are translated per backend dialect by `schema`.
//!
//! The `MockProvider` is kept for testing and offline use.

mod traits;
mod error;
mod schema;
mod genai_adapter;
mod genai_provider;
mod mock;

use std::collections::BTreeMap;
use std::sync::Arc;

// Core traits and types
pub use traits::{GenerationOptions, ProviderAdapter, ProviderStream, ToolInvoker};
pub use error::{ProviderError, ProviderResult};
pub use schema::{to_function_declaration, translate_schema, SchemaDialect};

// The real backends
pub use genai_provider::{GenaiAdapter, ModelHandle};

// Mock provider for testing
pub use mock::{MockConfig, MockMode, MockProvider};

use crate::config::AppConfig;
use crate::logging::Logger;
use crate::secrets::SecretStore;
use crate::types::{ModelSelector, ProviderKind};

/// Create the adapter for one backend
///
/// Keyed backends read their API key from `secrets` under the provider name.
pub fn create_provider(
    kind: ProviderKind,
    config: &AppConfig,
    secrets: &dyn SecretStore,
    logger: Arc<dyn Logger>,
) -> ProviderResult<Arc<dyn ProviderAdapter>> {
    let options = GenerationOptions::from_settings(&config.generation, &config.tools);

    match kind {
        ProviderKind::Mock => Ok(Arc::new(MockProvider::echo(logger))),
        _ => {
            let api_key = if kind.requires_api_key() {
                secrets.get(kind.as_str())
            } else {
                None
            };
            let base_url = config.providers.backend(kind).base_url.clone();
            let adapter = GenaiAdapter::new(kind, api_key, base_url, options, logger)?;
            Ok(Arc::new(adapter))
        }
    }
}

/// The enabled adapters, keyed by backend
#[derive(Clone)]
pub struct ProviderSet {
    adapters: BTreeMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    default: ProviderKind,
}

impl ProviderSet {
    /// Empty set routing unprefixed selectors to `default`
    pub fn new(default: ProviderKind) -> Self {
        Self {
            adapters: BTreeMap::new(),
            default,
        }
    }

    /// Build every enabled backend from config
    pub fn from_config(
        config: &AppConfig,
        secrets: &dyn SecretStore,
        logger: Arc<dyn Logger>,
    ) -> ProviderResult<Self> {
        let mut set = Self::new(config.providers.default);
        for kind in config.providers.enabled_kinds() {
            set.insert(create_provider(kind, config, secrets, logger.clone())?);
        }
        Ok(set)
    }

    /// Add or replace an adapter
    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.id(), adapter);
    }

    /// Builder form of `insert`
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Adapter for a parsed selector
    pub fn resolve(&self, selector: &ModelSelector) -> ProviderResult<Arc<dyn ProviderAdapter>> {
        self.get(selector.provider)
            .ok_or_else(|| ProviderError::UnsupportedProvider(selector.provider.to_string()))
    }

    pub fn default_kind(&self) -> ProviderKind {
        self.default
    }

    /// Enabled backends in display order
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.adapters.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("default", &self.default)
            .field("adapters", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NoOpLogger;
    use crate::secrets::MemorySecretStore;

    fn logger() -> Arc<dyn Logger> {
        Arc::new(NoOpLogger::new())
    }

    #[test]
    fn test_from_config_builds_enabled_backends() {
        let mut config = AppConfig::default();
        config.providers.set_enabled(ProviderKind::Mock, true);

        let secrets = MemorySecretStore::new();
        secrets.insert("gemini", "g-key");

        let set = ProviderSet::from_config(&config, &secrets, logger()).unwrap();
        assert_eq!(
            set.kinds(),
            vec![ProviderKind::Gemini, ProviderKind::Ollama, ProviderKind::Mock]
        );
        assert_eq!(set.default_kind(), ProviderKind::Gemini);
        assert!(set.get(ProviderKind::OpenAI).is_none());
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let config = AppConfig::default();
        let secrets = MemorySecretStore::new();

        let err = ProviderSet::from_config(&config, &secrets, logger()).unwrap_err();
        assert_eq!(err, ProviderError::missing_api_key("gemini"));
    }

    #[test]
    fn test_resolve_selector() {
        let set = ProviderSet::new(ProviderKind::Mock).with(Arc::new(MockProvider::echo(logger())));

        let mock = ModelSelector::parse("mock:echo", set.default_kind()).unwrap();
        assert_eq!(set.resolve(&mock).unwrap().id(), ProviderKind::Mock);

        let ollama = ModelSelector::parse("ollama:llama3.2", set.default_kind()).unwrap();
        assert!(matches!(
            set.resolve(&ollama),
            Err(ProviderError::UnsupportedProvider(_))
        ));
    }
}
