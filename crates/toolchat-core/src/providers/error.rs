//! Provider error types

use thiserror::Error;

/// Errors that can occur during provider operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Backend could not be reached
    #[error("{provider} is unavailable: {message}")]
    ConnectionUnavailable { provider: String, message: String },

    /// Backend answered with an error
    #[error("{provider} rejected the request{}: {message}", status_suffix(.status))]
    RemoteRejected {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Backend answered with something we could not interpret
    #[error("Malformed response from {provider}: {message}")]
    Malformed { provider: String, message: String },

    /// Missing API key
    #[error("API key is required for {provider}")]
    MissingApiKey { provider: String },

    /// Provider is unknown or disabled
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// The model kept requesting tools past the round limit
    #[error("Tool call loop exceeded {max_rounds} rounds")]
    ToolLoopExceeded { max_rounds: usize },

    /// Request was cancelled
    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Create a rejection error
    pub fn rejected(
        provider: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::RemoteRejected {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a missing API key error
    pub fn missing_api_key(provider: impl Into<String>) -> Self {
        Self::MissingApiKey {
            provider: provider.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify a backend error message
    ///
    /// Connection failures become `ConnectionUnavailable`; anything else is a
    /// rejection, with the HTTP status when the message carries one.
    pub fn from_backend_message(provider: impl Into<String>, message: impl Into<String>) -> Self {
        let provider = provider.into();
        let message = message.into();
        let lower = message.to_lowercase();

        const CONNECTION_MARKERS: [&str; 4] = [
            "connection refused",
            "error sending request",
            "dns error",
            "connect error",
        ];

        if CONNECTION_MARKERS.iter().any(|m| lower.contains(m)) {
            return Self::ConnectionUnavailable { provider, message };
        }

        let status = http_status_in(&message);
        Self::RemoteRejected {
            provider,
            status,
            message,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

/// First number in 400..=599 that follows the word "status"
fn http_status_in(message: &str) -> Option<u16> {
    let lower = message.to_lowercase();
    let start = lower.find("status")?;
    lower[start..]
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| s.len() == 3)
        .filter_map(|s| s.parse::<u16>().ok())
        .find(|code| (400..=599).contains(code))
}

pub type ProviderResult<T> = Result<T, ProviderError>;
