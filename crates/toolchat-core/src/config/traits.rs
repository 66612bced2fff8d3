//! Configuration provider trait

use async_trait::async_trait;

use super::settings::AppConfig;

/// Configuration provider abstraction
///
/// Implementations:
/// - `MemoryConfigProvider`: In-memory for testing
/// - `FileConfigProvider`: Reads from a YAML file (~/.config/toolchat/config.yaml)
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load the configuration as stored, before environment overrides
    async fn load(&self) -> ConfigResult<AppConfig>;

    /// Human-readable description of where the configuration comes from
    fn source(&self) -> String;
}

/// Errors that can occur during configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
