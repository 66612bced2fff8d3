//! Provider identity and model selector parsing

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// LLM backends the orchestrator can route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Ollama,
    OpenAI,
    Anthropic,
    Mock,
}

impl ProviderKind {
    /// Every known provider, in display order
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Gemini,
        ProviderKind::Ollama,
        ProviderKind::OpenAI,
        ProviderKind::Anthropic,
        ProviderKind::Mock,
    ];

    /// Identifier used in selectors and config keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Mock => "mock",
        }
    }

    /// Whether the backend needs an API key
    pub fn requires_api_key(&self) -> bool {
        matches!(
            self,
            ProviderKind::Gemini | ProviderKind::OpenAI | ProviderKind::Anthropic
        )
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "ollama" => Ok(ProviderKind::Ollama),
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "mock" => Ok(ProviderKind::Mock),
            _ => Err(SelectorError::UnknownProvider(s.to_string())),
        }
    }
}

/// Errors from selector parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Model selector is empty")]
    EmptyModel,

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Parsed `(provider, native model name)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelector {
    pub provider: ProviderKind,
    pub model: String,
}

impl ModelSelector {
    /// Parse a selector string.
    ///
    /// `"<provider>:<model>"` routes to `provider` when the prefix names a known
    /// backend; anything else is a model name for `default_provider`. Only the
    /// first `:` splits, so `ollama:llama3.2:3b` keeps its tag.
    pub fn parse(selector: &str, default_provider: ProviderKind) -> Result<Self, SelectorError> {
        let selector = selector.trim();

        let (provider, model) = match selector.split_once(':') {
            Some((prefix, rest)) => match prefix.parse::<ProviderKind>() {
                Ok(provider) => (provider, rest),
                Err(_) => (default_provider, selector),
            },
            None => (default_provider, selector),
        };

        if model.is_empty() {
            return Err(SelectorError::EmptyModel);
        }

        Ok(Self {
            provider,
            model: model.to_string(),
        })
    }
}

impl std::fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}
