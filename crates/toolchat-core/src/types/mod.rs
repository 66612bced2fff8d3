//! Core types shared by the tool layer, the providers and the orchestrator

mod message;
mod model;
mod tool;
mod stream;
mod cancellation;

pub use message::{last_user_message, ChatMessage, MessageRole};
pub use model::{ModelSelector, ProviderKind, SelectorError};
pub use tool::{empty_object_schema, ToolCall, ToolDescriptor, ToolOutput, ToolResult};
pub use stream::{collect_text, TextChunk};
pub use cancellation::CancellationToken;
