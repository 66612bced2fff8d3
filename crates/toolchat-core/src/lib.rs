//! Toolchat Core
//!
//! Streaming chat orchestration over subprocess MCP tool servers.
//!
//! ## Layers
//!
//! - `tools`: spawns tool servers over stdio, merges their tools into one
//!   catalog and routes calls back to the owning server
//! - `providers`: LLM backends behind one streaming trait, with tool-call
//!   round trips and per-backend schema translation
//! - `chat`: the startup context and the streaming entry point
//!
//! ```rust,ignore
//! use toolchat_core::{load_config, AppContext, ChatMessage, FileConfigProvider};
//!
//! let config = load_config(&FileConfigProvider::user()).await?;
//! let ctx = AppContext::build(config, secrets, logger)?;
//!
//! let mut stream = ctx
//!     .orchestrator()
//!     .chat_stream(vec![ChatMessage::user("list files in /data")], "gemini:gemini-2.0-flash");
//! while let Some(chunk) = stream.next().await {
//!     // Text chunks arrive as the backend produces them
//! }
//! ctx.shutdown().await;
//! ```

pub mod types;
pub mod logging;
pub mod secrets;
pub mod config;
pub mod mcp;
pub mod tools;
pub mod providers;
pub mod chat;

// Re-export commonly used types
pub use types::{
    ChatMessage, MessageRole,
    ModelSelector, ProviderKind, SelectorError,
    ToolCall, ToolDescriptor, ToolOutput, ToolResult,
    TextChunk,
    CancellationToken,
};

pub use logging::{Logger, MemoryLogger, NoOpLogger, TracingLogger};

pub use secrets::{
    SecretStore, SecretInfo, SecretStoreError, SecretStoreResult,
    EnvSecretStore, MemorySecretStore, ChainSecretStore,
};

pub use config::{
    load_config, AppConfig, ConfigError, ConfigProvider, FileConfigProvider,
    MemoryConfigProvider, ServerConfig,
};

pub use tools::{ConflictPolicy, InitReport, SessionPolicy, ToolRegistry, ToolSessionManager};

pub use providers::{ProviderAdapter, ProviderError, ProviderResult, ProviderSet};

pub use chat::{AppContext, ChatOrchestrator, ChatStream, HealthStatus, ServiceInfo, StartupError};

// MCP client using official rmcp SDK
pub use mcp::{McpClient, McpError};
