//! Provider adapter trait definition

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use super::error::ProviderResult;
use crate::config::{GenerationSettings, ToolSettings};
use crate::types::{CancellationToken, ChatMessage, ProviderKind, ToolCall, ToolDescriptor, ToolResult};

/// Sampling parameters and the tool round limit for one adapter
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub max_output_tokens: u32,
    pub max_tool_rounds: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_settings(&GenerationSettings::default(), &ToolSettings::default())
    }
}

impl GenerationOptions {
    pub fn from_settings(generation: &GenerationSettings, tools: &ToolSettings) -> Self {
        Self {
            temperature: generation.temperature,
            top_p: generation.top_p,
            max_output_tokens: generation.max_output_tokens,
            max_tool_rounds: tools.max_tool_rounds,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }
}

/// Callback adapters use to run the model's tool calls
///
/// Failures are folded into error results so the model can react.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn execute_tool_call(&self, call: &ToolCall) -> ToolResult;
}

/// Text deltas in arrival order; an `Err` item is the last item
pub type ProviderStream = Pin<Box<dyn Stream<Item = ProviderResult<String>> + Send>>;

/// One LLM backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Backend this adapter talks to
    fn id(&self) -> ProviderKind;

    /// Stream a response, running tool round trips through `invoker`
    ///
    /// The stream is lazy and ends when the token fires. Dropping it aborts
    /// the in-flight request and any in-flight tool call.
    async fn generate_stream(
        &self,
        conversation: Vec<ChatMessage>,
        model: &str,
        tools: Option<Vec<ToolDescriptor>>,
        invoker: Arc<dyn ToolInvoker>,
        cancel: CancellationToken,
    ) -> ProviderResult<ProviderStream>;
}
