//! Mock provider for testing
//!
//! Provides deterministic, configurable responses without network dependencies.
//! Useful for orchestrator tests, offline demos and abort-on-drop checks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use super::error::{ProviderError, ProviderResult};
use super::traits::{ProviderAdapter, ProviderStream, ToolInvoker};
use crate::logging::Logger;
use crate::types::{
    last_user_message, CancellationToken, ChatMessage, ProviderKind, ToolCall, ToolDescriptor,
};

/// Mock response mode
#[derive(Debug, Clone, Default)]
pub enum MockMode {
    /// Echo back the last user message
    #[default]
    Echo,
    /// Return a fixed response
    Fixed(String),
    /// Return response as specific chunks
    Chunks(Vec<String>),
    /// Fail after `delay_chunks` text chunks
    Error { message: String, delay_chunks: usize },
    /// Return nothing (empty response)
    Empty,
    /// Request one tool call, then answer `prefix` followed by the tool result
    ToolCall {
        tool: String,
        arguments: Value,
        prefix: String,
    },
}

/// Configuration for the mock provider
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Response mode
    pub mode: MockMode,
    /// Delay between chunks in milliseconds (0 = no delay)
    pub chunk_delay_ms: u64,
    /// Size of each chunk when splitting fixed/echo responses
    pub chunk_size: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            mode: MockMode::Echo,
            chunk_delay_ms: 0,
            chunk_size: 10,
        }
    }
}

/// Decrements the live stream counter when the stream is dropped
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Step {
    Text(String),
    Fail(ProviderError),
    CallTool(ToolCall, String),
}

struct MockStreamState {
    steps: VecDeque<Step>,
    chunk_size: usize,
    delay: Duration,
    started: bool,
    done: bool,
    cancel: CancellationToken,
    invoker: Arc<dyn ToolInvoker>,
    logger: Arc<dyn Logger>,
    _guard: ActiveGuard,
}

/// Mock LLM provider for testing
pub struct MockProvider {
    config: MockConfig,
    active: Arc<AtomicUsize>,
    logger: Arc<dyn Logger>,
}

impl MockProvider {
    /// Create a new mock provider with default config
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self::with_config(MockConfig::default(), logger)
    }

    /// Create with specific config
    pub fn with_config(config: MockConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            config,
            active: Arc::new(AtomicUsize::new(0)),
            logger,
        }
    }

    fn with_mode(mode: MockMode, logger: Arc<dyn Logger>) -> Self {
        Self::with_config(
            MockConfig {
                mode,
                ..Default::default()
            },
            logger,
        )
    }

    /// Create an echo provider (echoes back the last user message)
    pub fn echo(logger: Arc<dyn Logger>) -> Self {
        Self::with_mode(MockMode::Echo, logger)
    }

    /// Create a fixed response provider
    pub fn fixed(response: impl Into<String>, logger: Arc<dyn Logger>) -> Self {
        Self::with_mode(MockMode::Fixed(response.into()), logger)
    }

    /// Create a chunked response provider
    pub fn chunked(chunks: Vec<String>, delay_ms: u64, logger: Arc<dyn Logger>) -> Self {
        Self::with_mode(MockMode::Chunks(chunks), logger).with_delay(delay_ms)
    }

    /// Create an error-producing provider
    pub fn error(message: impl Into<String>, delay_chunks: usize, logger: Arc<dyn Logger>) -> Self {
        Self::with_mode(
            MockMode::Error {
                message: message.into(),
                delay_chunks,
            },
            logger,
        )
    }

    /// Create a provider that calls `tool` once and summarizes its result
    pub fn tool_call(
        tool: impl Into<String>,
        arguments: Value,
        prefix: impl Into<String>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self::with_mode(
            MockMode::ToolCall {
                tool: tool.into(),
                arguments,
                prefix: prefix.into(),
            },
            logger,
        )
    }

    /// Set chunk delay
    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.config.chunk_delay_ms = delay_ms;
        self
    }

    /// Set chunk size for splitting responses
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Streams created by this provider that have not been dropped yet
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Split text into chunks
    fn split_into_chunks(text: &str, chunk_size: usize) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        if chunk_size == 0 {
            return vec![text.to_string()];
        }

        text.chars()
            .collect::<Vec<_>>()
            .chunks(chunk_size)
            .map(|c| c.iter().collect())
            .collect()
    }

    fn plan(&self, conversation: &[ChatMessage], tools: Option<&[ToolDescriptor]>) -> Vec<Step> {
        let split = |text: &str| {
            Self::split_into_chunks(text, self.config.chunk_size)
                .into_iter()
                .map(Step::Text)
                .collect::<Vec<_>>()
        };

        match &self.config.mode {
            MockMode::Echo => {
                let text = last_user_message(conversation)
                    .map(|m| m.content.clone())
                    .unwrap_or_else(|| "Hello from MockProvider!".to_string());
                split(&text)
            }
            MockMode::Fixed(response) => split(response),
            MockMode::Chunks(chunks) => chunks.iter().cloned().map(Step::Text).collect(),
            MockMode::Empty => Vec::new(),
            MockMode::Error {
                message,
                delay_chunks,
            } => {
                let mut steps: Vec<Step> = (0..*delay_chunks)
                    .map(|i| Step::Text(format!("Chunk {} before error. ", i)))
                    .collect();
                steps.push(Step::Fail(ProviderError::rejected("mock", None, message.clone())));
                steps
            }
            MockMode::ToolCall {
                tool,
                arguments,
                prefix,
            } => {
                let offered = tools
                    .map(|ts| ts.iter().any(|t| &t.name == tool))
                    .unwrap_or(false);
                if offered {
                    vec![Step::CallTool(
                        ToolCall::new("mock_call_1", tool.clone(), arguments.clone()),
                        prefix.clone(),
                    )]
                } else {
                    split(&format!("Tool '{}' is not available.", tool))
                }
            }
        }
    }
}

async fn next_mock_item(mut state: MockStreamState) -> Option<(ProviderResult<String>, MockStreamState)> {
    loop {
        if state.done {
            return None;
        }

        if state.cancel.is_cancelled() {
            state.done = true;
            return Some((Err(ProviderError::Cancelled), state));
        }

        let step = state.steps.pop_front()?;

        // Delay every chunk except the first
        if state.started && !state.delay.is_zero() {
            tokio::select! {
                _ = state.cancel.cancelled() => {
                    state.done = true;
                    return Some((Err(ProviderError::Cancelled), state));
                }
                _ = tokio::time::sleep(state.delay) => {}
            }
        }
        state.started = true;

        match step {
            Step::Text(text) => return Some((Ok(text), state)),
            Step::Fail(error) => {
                state.done = true;
                return Some((Err(error), state));
            }
            Step::CallTool(call, prefix) => {
                state
                    .logger
                    .debug(&format!("[MockProvider] Requesting tool call: {}", call.name));

                let result = tokio::select! {
                    _ = state.cancel.cancelled() => {
                        state.done = true;
                        return Some((Err(ProviderError::Cancelled), state));
                    }
                    result = state.invoker.execute_tool_call(&call) => result,
                };

                let summary = format!("{}{}", prefix, result.content);
                let chunks = MockProvider::split_into_chunks(&summary, state.chunk_size);
                for chunk in chunks.into_iter().rev() {
                    state.steps.push_front(Step::Text(chunk));
                }
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn id(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn generate_stream(
        &self,
        conversation: Vec<ChatMessage>,
        model: &str,
        tools: Option<Vec<ToolDescriptor>>,
        invoker: Arc<dyn ToolInvoker>,
        cancel: CancellationToken,
    ) -> ProviderResult<ProviderStream> {
        self.logger.debug(&format!(
            "[MockProvider] generate_stream called: model={}, {} messages",
            model,
            conversation.len()
        ));

        let steps = self.plan(&conversation, tools.as_deref());

        let state = MockStreamState {
            steps: steps.into(),
            chunk_size: self.config.chunk_size,
            delay: Duration::from_millis(self.config.chunk_delay_ms),
            started: false,
            done: false,
            cancel,
            invoker,
            logger: self.logger.clone(),
            _guard: ActiveGuard::new(self.active.clone()),
        };

        Ok(Box::pin(stream::unfold(state, next_mock_item)))
    }
}
