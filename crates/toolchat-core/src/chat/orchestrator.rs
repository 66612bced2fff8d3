//! Streaming chat entry point

use std::pin::Pin;
use std::sync::Arc;

use futures::future;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::Logger;
use crate::providers::{ProviderError, ProviderSet, ProviderStream, ToolInvoker};
use crate::tools::ToolSessionManager;
use crate::types::{CancellationToken, ChatMessage, ModelSelector, SelectorError, TextChunk};

/// Service name reported by `health()`
pub const SERVICE_NAME: &str = "toolchat";

/// Reply chunks in provider order; an `Error` chunk is always the last one
pub type ChatStream = Pin<Box<dyn Stream<Item = TextChunk> + Send>>;

/// Reasons a chat cannot start
#[derive(Error, Debug)]
enum SetupError {
    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Liveness payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
}

/// Root payload describing the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub message: String,
    pub version: String,
}

/// Routes a conversation to a provider with the current tool catalog
#[derive(Clone)]
pub struct ChatOrchestrator {
    tools: Arc<ToolSessionManager>,
    providers: Arc<ProviderSet>,
    logger: Arc<dyn Logger>,
}

impl ChatOrchestrator {
    pub fn new(
        tools: Arc<ToolSessionManager>,
        providers: Arc<ProviderSet>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            tools,
            providers,
            logger,
        }
    }

    /// Stream the assistant reply to `conversation`
    pub fn chat_stream(&self, conversation: Vec<ChatMessage>, selector: &str) -> ChatStream {
        self.chat_stream_with_cancel(conversation, selector, CancellationToken::new())
    }

    /// Stream the assistant reply, stopping when `cancel` fires
    ///
    /// Nothing runs until the stream is first polled. Setup failures (bad
    /// selector, unknown or disabled provider) produce a single `Error` chunk.
    pub fn chat_stream_with_cancel(
        &self,
        conversation: Vec<ChatMessage>,
        selector: &str,
        cancel: CancellationToken,
    ) -> ChatStream {
        let this = self.clone();
        let selector = selector.to_string();
        let token = cancel.clone();

        let open = async move {
            match this.open(conversation, &selector, token.clone()).await {
                Ok(provider_stream) => into_chunks(provider_stream),
                Err(e) => {
                    this.logger
                        .error(&format!("[ChatOrchestrator] {}: {}", selector, e));
                    error_stream(e.to_string())
                }
            }
        };

        stream::once(open)
            .flatten()
            .take_until(cancel.cancelled_owned())
            .boxed()
    }

    async fn open(
        &self,
        conversation: Vec<ChatMessage>,
        selector: &str,
        cancel: CancellationToken,
    ) -> Result<ProviderStream, SetupError> {
        let report = self.tools.ensure_initialized().await;
        if report.is_degraded() {
            let failed: Vec<&str> = report.failed.iter().map(|(name, _)| name.as_str()).collect();
            self.logger.warn(&format!(
                "[ChatOrchestrator] Tool servers degraded, unavailable: {}",
                failed.join(", ")
            ));
        }

        let selector = ModelSelector::parse(selector, self.providers.default_kind())?;
        let adapter = self.providers.resolve(&selector)?;

        let catalog = self.tools.catalog();
        self.logger.debug(&format!(
            "[ChatOrchestrator] {} with {} tools, {} messages",
            selector,
            catalog.len(),
            conversation.len()
        ));
        let tools = if catalog.is_empty() { None } else { Some(catalog) };

        let invoker: Arc<dyn ToolInvoker> = self.tools.registry();
        let stream = adapter
            .generate_stream(conversation, &selector.model, tools, invoker, cancel)
            .await?;
        Ok(stream)
    }

    /// Static liveness payload
    pub fn health() -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Static root payload
    pub fn service_info() -> ServiceInfo {
        ServiceInfo {
            message: "Toolchat backend with MCP tool servers".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Map provider deltas to chunks; the first error is the last chunk
fn into_chunks(provider_stream: ProviderStream) -> ChatStream {
    provider_stream
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            let chunk = match item {
                Ok(text) => Some(TextChunk::text(text)),
                Err(ProviderError::Cancelled) => None,
                Err(e) => {
                    *failed = true;
                    Some(TextChunk::error(e.to_string()))
                }
            };
            future::ready(chunk)
        })
        .boxed()
}

fn error_stream(message: String) -> ChatStream {
    stream::once(future::ready(TextChunk::error(message))).boxed()
}
