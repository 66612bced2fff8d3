//! In-memory configuration provider

use async_trait::async_trait;
use parking_lot::RwLock;

use super::settings::AppConfig;
use super::traits::{ConfigProvider, ConfigResult};

/// In-memory configuration provider for testing
#[derive(Debug, Default)]
pub struct MemoryConfigProvider {
    config: RwLock<AppConfig>,
}

impl MemoryConfigProvider {
    /// Create a provider holding the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider holding `config`
    pub fn with_config(config: AppConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Replace the stored configuration
    pub fn set_config(&self, config: AppConfig) {
        *self.config.write() = config;
    }
}

#[async_trait]
impl ConfigProvider for MemoryConfigProvider {
    async fn load(&self) -> ConfigResult<AppConfig> {
        Ok(self.config.read().clone())
    }

    fn source(&self) -> String {
        "memory".to_string()
    }
}
