//! File-based configuration provider (YAML)

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::settings::AppConfig;
use super::traits::{ConfigProvider, ConfigResult};

/// File-based configuration provider
///
/// A missing file yields the default configuration. The parsed file is
/// cached until `reload()`.
///
/// # Example
///
/// ```no_run
/// use toolchat_core::config::FileConfigProvider;
///
/// let user_config = FileConfigProvider::user();
/// let explicit = FileConfigProvider::new("/etc/toolchat/config.yaml");
/// ```
pub struct FileConfigProvider {
    path: PathBuf,
    cache: RwLock<Option<AppConfig>>,
}

impl FileConfigProvider {
    /// Create a new file config provider for a specific path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    /// Create a user-level config provider (<config dir>/toolchat/config.yaml)
    pub fn user() -> Self {
        Self::new(Self::default_path())
    }

    /// Default location of the user config file
    pub fn default_path() -> PathBuf {
        // XDG config directory (~/.config on Linux, ~/Library/Application Support on macOS)
        let config_dir = dirs::config_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        });
        config_dir.join("toolchat").join("config.yaml")
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the config file exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn read(&self) -> ConfigResult<AppConfig> {
        if !self.path.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.path)?;
        AppConfig::from_yaml(&content)
    }

    /// Get cached or load config
    fn get_config(&self) -> ConfigResult<AppConfig> {
        if let Some(config) = self.cache.read().as_ref() {
            return Ok(config.clone());
        }

        let config = self.read()?;
        *self.cache.write() = Some(config.clone());
        Ok(config)
    }

    /// Reload config from disk (invalidate cache)
    pub fn reload(&self) -> ConfigResult<AppConfig> {
        let config = self.read()?;
        *self.cache.write() = Some(config.clone());
        Ok(config)
    }

    /// Write a config to this provider's path, creating parent directories
    pub fn save(&self, config: &AppConfig) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&self.path, config.to_yaml()?)?;
        *self.cache.write() = Some(config.clone());
        Ok(())
    }
}

impl std::fmt::Debug for FileConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfigProvider")
            .field("path", &self.path)
            .field("exists", &self.exists())
            .finish()
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load(&self) -> ConfigResult<AppConfig> {
        self.get_config()
    }

    fn source(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::types::ProviderKind;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let provider = FileConfigProvider::new(dir.path().join("config.yaml"));

        assert!(!provider.exists());
        assert_eq!(provider.load().await.unwrap(), AppConfig::default());
    }

    #[tokio::test]
    async fn test_load_is_cached_until_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "providers:\n  default: ollama\n").unwrap();

        let provider = FileConfigProvider::new(&path);
        assert_eq!(provider.load().await.unwrap().providers.default, ProviderKind::Ollama);

        fs::write(&path, "providers:\n  default: gemini\n").unwrap();
        // Still cached
        assert_eq!(provider.load().await.unwrap().providers.default, ProviderKind::Ollama);

        provider.reload().unwrap();
        assert_eq!(provider.load().await.unwrap().providers.default, ProviderKind::Gemini);
    }

    #[tokio::test]
    async fn test_save_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("toolchat").join("config.yaml");
        let provider = FileConfigProvider::new(&path);

        let mut config = AppConfig::default();
        config.tools.max_tool_rounds = 3;
        provider.save(&config).unwrap();

        assert!(provider.exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("max_tool_rounds: 3"));

        let fresh = FileConfigProvider::new(&path);
        assert_eq!(fresh.load().await.unwrap().tools.max_tool_rounds, 3);
    }

    #[tokio::test]
    async fn test_parse_error_surfaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "tool_servers: {not: [a list").unwrap();

        let provider = FileConfigProvider::new(&path);
        assert!(matches!(provider.load().await, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_default_path_shape() {
        let path = FileConfigProvider::default_path();
        assert!(path.ends_with("toolchat/config.yaml"));
    }
}
