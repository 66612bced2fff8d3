//! MCP (Model Context Protocol) client module
//!
//! Uses the official rmcp SDK to talk to tool servers launched as child
//! processes over their stdio pipes.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolchat_core::config::ServerConfig;
//! use toolchat_core::mcp::McpClient;
//!
//! let config = ServerConfig::new("files", "npx")
//!     .with_args(["-y", "@modelcontextprotocol/server-filesystem", "/data"]);
//! let client = McpClient::connect_stdio(&config, logger).await?;
//!
//! let tools = client.list_tools().await?;
//! let output = client.call_tool("list_directory", json!({ "path": "/data" })).await?;
//! client.close().await;
//! ```

mod client;

pub use client::{descriptor_from_tool, output_from_result, McpClient, McpError, McpResult};
