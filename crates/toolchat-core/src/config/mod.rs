//! Configuration sources and the application configuration schema
//!
//! - `FileConfigProvider`: YAML file (explicit path or user config dir)
//! - `MemoryConfigProvider`: In-memory for testing
//!
//! `load_config` loads from a provider, applies environment overrides and
//! validates the result.

mod traits;
mod settings;
mod memory;
mod file;

use std::sync::Arc;

pub use traits::{ConfigError, ConfigProvider, ConfigResult};
pub use settings::{
    AppConfig, BackendSettings, GenerationSettings, ProviderSettings, ServerConfig,
    ServerSettings, ToolSettings, DEFAULT_OLLAMA_BASE_URL, ENV_SERVER_NAME,
};
pub use memory::MemoryConfigProvider;
pub use file::FileConfigProvider;

/// Load, apply process environment overrides and validate
pub async fn load_config(provider: &dyn ConfigProvider) -> ConfigResult<Arc<AppConfig>> {
    let mut config = provider.load().await?;
    config.apply_process_env()?;
    config.validate()?;
    Ok(Arc::new(config))
}
