//! Application context built once at startup

use std::sync::Arc;

use thiserror::Error;

use super::orchestrator::ChatOrchestrator;
use crate::config::{AppConfig, ConfigError};
use crate::logging::Logger;
use crate::providers::{ProviderError, ProviderSet};
use crate::secrets::SecretStore;
use crate::tools::{ServerConnector, ToolSessionManager};

/// Fatal errors while assembling the context
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing API key for enabled provider '{provider}'")]
    MissingCredential { provider: String },

    #[error("Provider setup failed: {0}")]
    Provider(ProviderError),
}

impl From<ProviderError> for StartupError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MissingApiKey { provider } => StartupError::MissingCredential { provider },
            other => StartupError::Provider(other),
        }
    }
}

/// Everything a request needs: config, tool sessions and providers
///
/// Cheap to clone; clones share the same tool sessions.
#[derive(Clone)]
pub struct AppContext {
    config: Arc<AppConfig>,
    tools: Arc<ToolSessionManager>,
    providers: Arc<ProviderSet>,
    logger: Arc<dyn Logger>,
}

impl AppContext {
    /// Build the context from loaded config
    ///
    /// Tool servers are not contacted here; they start on first use.
    pub fn build(
        config: Arc<AppConfig>,
        secrets: Arc<dyn SecretStore>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let providers = ProviderSet::from_config(&config, secrets.as_ref(), logger.clone())?;
        let tools = ToolSessionManager::new(config.tool_servers.clone(), &config.tools, logger.clone());

        logger.info(&format!(
            "[AppContext] Providers: {}; tool servers: {}",
            providers
                .kinds()
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            config.tool_servers.len()
        ));

        Ok(Self::with_parts(config, tools, providers, logger))
    }

    /// Build the context with an injected connector and provider set
    pub fn with_connector(
        config: Arc<AppConfig>,
        connector: Arc<dyn ServerConnector>,
        providers: ProviderSet,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let tools = ToolSessionManager::with_connector(
            config.tool_servers.clone(),
            &config.tools,
            connector,
            logger.clone(),
        );
        Self::with_parts(config, tools, providers, logger)
    }

    fn with_parts(
        config: Arc<AppConfig>,
        tools: ToolSessionManager,
        providers: ProviderSet,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            config,
            tools: Arc::new(tools),
            providers: Arc::new(providers),
            logger,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolSessionManager> {
        &self.tools
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Orchestrator sharing this context's sessions and providers
    pub fn orchestrator(&self) -> ChatOrchestrator {
        ChatOrchestrator::new(self.tools.clone(), self.providers.clone(), self.logger.clone())
    }

    /// Close every tool-server connection
    pub async fn shutdown(&self) {
        self.tools.shutdown().await;
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("providers", &self.providers)
            .field("tool_servers", &self.config.tool_servers.len())
            .finish()
    }
}
