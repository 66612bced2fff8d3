//! Application configuration schema

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::traits::{ConfigError, ConfigResult};
use crate::tools::{ConflictPolicy, SessionPolicy};
use crate::types::ProviderKind;

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Name given to the server synthesized from `MCP_SERVER_COMMAND`
pub const ENV_SERVER_NAME: &str = "default";

/// Complete configuration, immutable once loaded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub providers: ProviderSettings,
    pub generation: GenerationSettings,
    pub tools: ToolSettings,
    pub tool_servers: Vec<ServerConfig>,
}

/// Front-door settings (host, port, CORS origins)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Per-backend switch and endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl BackendSettings {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            base_url: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Provider table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Backend used when a selector has no provider prefix
    pub default: ProviderKind,
    pub gemini: BackendSettings,
    pub ollama: BackendSettings,
    pub openai: BackendSettings,
    pub anthropic: BackendSettings,
    pub mock: BackendSettings,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            default: ProviderKind::Gemini,
            gemini: BackendSettings::enabled(),
            ollama: BackendSettings::enabled().with_base_url(DEFAULT_OLLAMA_BASE_URL),
            openai: BackendSettings::disabled(),
            anthropic: BackendSettings::disabled(),
            mock: BackendSettings::disabled(),
        }
    }
}

impl ProviderSettings {
    /// Settings for one backend
    pub fn backend(&self, kind: ProviderKind) -> &BackendSettings {
        match kind {
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Ollama => &self.ollama,
            ProviderKind::OpenAI => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Mock => &self.mock,
        }
    }

    fn backend_mut(&mut self, kind: ProviderKind) -> &mut BackendSettings {
        match kind {
            ProviderKind::Gemini => &mut self.gemini,
            ProviderKind::Ollama => &mut self.ollama,
            ProviderKind::OpenAI => &mut self.openai,
            ProviderKind::Anthropic => &mut self.anthropic,
            ProviderKind::Mock => &mut self.mock,
        }
    }

    /// Enable or disable a backend
    pub fn set_enabled(&mut self, kind: ProviderKind, enabled: bool) {
        self.backend_mut(kind).enabled = enabled;
    }

    pub fn is_enabled(&self, kind: ProviderKind) -> bool {
        self.backend(kind).enabled
    }

    /// Enabled backends in display order
    pub fn enabled_kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.is_enabled(*k))
            .collect()
    }
}

/// Sampling parameters applied to every request
///
/// There is no `top_k`: genai 0.5 `ChatOptions` has no top-k setting, so a
/// `top_k` key in a config file is accepted and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f64,
    pub top_p: f64,
    pub max_output_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            max_output_tokens: 8192,
        }
    }
}

/// Tool-layer policies and limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub session_policy: SessionPolicy,
    pub conflict_policy: ConflictPolicy,
    pub handshake_timeout_secs: u64,
    pub call_timeout_secs: u64,
    pub max_concurrent_spawns: usize,
    pub max_tool_rounds: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            session_policy: SessionPolicy::default(),
            conflict_policy: ConflictPolicy::default(),
            handshake_timeout_secs: 30,
            call_timeout_secs: 60,
            max_concurrent_spawns: 4,
            max_tool_rounds: 5,
        }
    }
}

/// How to launch one MCP tool server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    /// Parse a YAML document
    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply overrides read through `lookup` (normally `std::env::var`)
    ///
    /// - `MCP_SERVER_COMMAND` / `MCP_SERVER_ARGS`: adds server `default` when none are configured
    /// - `TOOLCHAT_HOST`, `TOOLCHAT_PORT`, `TOOLCHAT_ALLOWED_ORIGINS`
    /// - `OLLAMA_BASE_URL`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(command) = lookup("MCP_SERVER_COMMAND") {
            if self.tool_servers.is_empty() {
                let args = lookup("MCP_SERVER_ARGS")
                    .map(|raw| split_list(&raw))
                    .unwrap_or_default();
                self.tool_servers
                    .push(ServerConfig::new(ENV_SERVER_NAME, command.trim()).with_args(args));
            }
        }

        if let Some(host) = lookup("TOOLCHAT_HOST") {
            self.server.host = host.trim().to_string();
        }

        if let Some(port) = lookup("TOOLCHAT_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("TOOLCHAT_PORT is not a port: {}", port)))?;
        }

        if let Some(origins) = lookup("TOOLCHAT_ALLOWED_ORIGINS") {
            self.server.allowed_origins = split_list(&origins);
        }

        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.providers.ollama.base_url = Some(url.trim().to_string());
        }

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) -> ConfigResult<()> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Reject configurations that cannot start
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for server in &self.tool_servers {
            if server.name.trim().is_empty() {
                return Err(ConfigError::Invalid("tool server with empty name".to_string()));
            }
            if server.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tool server '{}' has an empty command",
                    server.name
                )));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tool server name: {}",
                    server.name
                )));
            }
        }

        let tools = &self.tools;
        for (label, value) in [
            ("handshake_timeout_secs", tools.handshake_timeout_secs as usize),
            ("call_timeout_secs", tools.call_timeout_secs as usize),
            ("max_concurrent_spawns", tools.max_concurrent_spawns),
            ("max_tool_rounds", tools.max_tool_rounds),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("tools.{} must be positive", label)));
            }
        }

        if self.generation.max_output_tokens == 0 {
            return Err(ConfigError::Invalid(
                "generation.max_output_tokens must be positive".to_string(),
            ));
        }

        if !self.providers.is_enabled(self.providers.default) {
            return Err(ConfigError::Invalid(format!(
                "default provider '{}' is disabled",
                self.providers.default
            )));
        }

        Ok(())
    }
}
