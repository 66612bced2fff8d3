//! Environment variable secret store

use std::collections::HashMap;
use std::env;

use once_cell::sync::Lazy;

use super::traits::SecretStore;

/// Mapping from provider names to environment variable names
static ENV_VAR_MAP: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("gemini", vec!["GEMINI_API_KEY", "GOOGLE_API_KEY"]);
    m.insert("google", vec!["GEMINI_API_KEY", "GOOGLE_API_KEY"]);
    m.insert("openai", vec!["OPENAI_API_KEY"]);
    m.insert("anthropic", vec!["ANTHROPIC_API_KEY"]);
    m.insert("ollama", vec![]); // Local backend, no key
    m.insert("mock", vec![]);
    m
});

/// Secret store that reads from environment variables
///
/// Read-only. Provider names map to their conventional variables:
/// - `gemini` → `GEMINI_API_KEY` or `GOOGLE_API_KEY`
/// - `openai` → `OPENAI_API_KEY`
/// - `anthropic` → `ANTHROPIC_API_KEY`
///
/// Variables can also be read directly by their full name.
#[derive(Debug, Default)]
pub struct EnvSecretStore {
    _private: (),
}

impl EnvSecretStore {
    /// Create a new environment variable secret store
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Get the environment variable names for a provider
    pub fn get_env_vars_for_provider(provider: &str) -> Option<&'static [&'static str]> {
        ENV_VAR_MAP.get(provider.to_lowercase().as_str()).map(|v| v.as_slice())
    }

    fn non_empty(var: &str) -> Option<String> {
        env::var(var).ok().filter(|v| !v.is_empty())
    }
}

impl SecretStore for EnvSecretStore {
    fn name(&self) -> &str {
        "env"
    }

    fn get(&self, key: &str) -> Option<String> {
        // Direct env var access first
        if let Some(value) = Self::non_empty(key) {
            return Some(value);
        }

        // Then the provider mapping
        if let Some(env_vars) = Self::get_env_vars_for_provider(key) {
            if let Some(value) = env_vars.iter().find_map(|var| Self::non_empty(var)) {
                return Some(value);
            }
        }

        // Finally the uppercase version with _API_KEY suffix
        Self::non_empty(&format!("{}_API_KEY", key.to_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_store_name() {
        let store = EnvSecretStore::new();
        assert_eq!(store.name(), "env");
    }

    #[test]
    fn test_env_store_get_direct() {
        env::set_var("TOOLCHAT_TEST_SECRET_12345", "test_value");

        let store = EnvSecretStore::new();
        assert_eq!(
            store.get("TOOLCHAT_TEST_SECRET_12345"),
            Some("test_value".to_string())
        );

        env::remove_var("TOOLCHAT_TEST_SECRET_12345");
    }

    #[test]
    fn test_env_store_auto_suffix() {
        env::set_var("TOOLCHATTESTPROVIDER_API_KEY", "k-123");

        let store = EnvSecretStore::new();
        assert_eq!(store.get("toolchattestprovider"), Some("k-123".to_string()));

        env::remove_var("TOOLCHATTESTPROVIDER_API_KEY");
    }

    #[test]
    fn test_env_store_get_not_found() {
        let store = EnvSecretStore::new();
        assert_eq!(store.get("nonexistent_provider_xyz"), None);
        assert!(store.require("nonexistent_provider_xyz").is_err());
    }

    #[test]
    fn test_provider_mapping() {
        assert_eq!(
            EnvSecretStore::get_env_vars_for_provider("Gemini"),
            Some(&["GEMINI_API_KEY", "GOOGLE_API_KEY"][..])
        );
        assert_eq!(EnvSecretStore::get_env_vars_for_provider("ollama"), Some(&[][..]));
        assert!(EnvSecretStore::get_env_vars_for_provider("unknown").is_none());
    }
}
