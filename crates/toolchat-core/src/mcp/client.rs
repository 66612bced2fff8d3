//! MCP client over the stdio pipes of a child process
//!
//! Uses the official rmcp SDK for the handshake, `tools/list` and `tools/call`.

use std::sync::Arc;

use parking_lot::Mutex;
use rmcp::{
    model::{
        CallToolRequestParams, CallToolResult, ClientCapabilities, ClientInfo, Implementation,
        RawContent, Tool,
    },
    service::{Peer, RunningService, ServiceError},
    transport::{ConfigureCommandExt, TokioChildProcess},
    RoleClient, ServiceExt,
};
use serde_json::Value;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::logging::Logger;
use crate::types::{ToolDescriptor, ToolOutput};

/// MCP client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    #[error("Failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("Initialization failed: {0}")]
    Handshake(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server returned an error: {0}")]
    ServerReported(String),

    #[error("Session is closed")]
    Closed,
}

pub type McpResult<T> = Result<T, McpError>;

impl From<ServiceError> for McpError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::McpError(data) => McpError::ServerReported(data.message.to_string()),
            other => McpError::Transport(other.to_string()),
        }
    }
}

fn client_info() -> ClientInfo {
    ClientInfo {
        meta: None,
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "toolchat-core".to_string(),
            title: Some("Toolchat".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            website_url: None,
            icons: None,
        },
    }
}

/// One MCP session with a subprocess tool server
///
/// The child process lives as long as the session; closing (or dropping)
/// the client terminates it.
pub struct McpClient {
    server: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
    logger: Arc<dyn Logger>,
}

impl McpClient {
    /// Spawn the server process and perform the `initialize` handshake
    pub async fn connect_stdio(config: &ServerConfig, logger: Arc<dyn Logger>) -> McpResult<Self> {
        logger.debug(&format!(
            "[McpClient] Spawning '{}': {} {}",
            config.name,
            config.command,
            config.args.join(" ")
        ));

        let command = tokio::process::Command::new(&config.command).configure(|cmd| {
            cmd.args(&config.args)
                .envs(config.env.iter())
                .stderr(std::process::Stdio::inherit())
                .kill_on_drop(true);
        });

        let transport = TokioChildProcess::new(command).map_err(|e| McpError::Spawn {
            command: config.command.clone(),
            message: e.to_string(),
        })?;

        let service = client_info()
            .serve(transport)
            .await
            .map_err(|e| McpError::Handshake(e.to_string()))?;

        if let Some(info) = service.peer_info() {
            logger.info(&format!(
                "[McpClient] '{}' initialized ({} {})",
                config.name, info.server_info.name, info.server_info.version
            ));
        }

        Ok(Self {
            server: config.name.clone(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            logger,
        })
    }

    /// Name of the configured server this session talks to
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn is_closed(&self) -> bool {
        self.service.lock().is_none()
    }

    fn ensure_open(&self) -> McpResult<()> {
        if self.is_closed() {
            Err(McpError::Closed)
        } else {
            Ok(())
        }
    }

    /// List every tool the server advertises (all pages)
    pub async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        self.ensure_open()?;

        let tools = self.peer.list_all_tools().await?;

        self.logger.debug(&format!(
            "[McpClient] '{}' listed {} tools",
            self.server,
            tools.len()
        ));

        Ok(tools
            .into_iter()
            .map(|tool| descriptor_from_tool(tool, &self.server))
            .collect())
    }

    /// Call a tool by name
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolOutput> {
        self.ensure_open()?;

        self.logger
            .debug(&format!("[McpClient] '{}' calling tool: {}", self.server, name));

        let params = CallToolRequestParams {
            meta: None,
            name: name.to_owned().into(),
            arguments: arguments.as_object().cloned(),
            task: None,
        };

        let result = self.peer.call_tool(params).await?;
        output_from_result(result, &self.server)
    }

    /// Terminate the session; later calls are no-ops
    pub async fn close(&self) {
        let service = self.service.lock().take();
        if let Some(service) = service {
            self.logger
                .debug(&format!("[McpClient] Closing session with '{}'", self.server));
            if let Err(e) = service.cancel().await {
                self.logger.warn(&format!(
                    "[McpClient] '{}' did not shut down cleanly: {}",
                    self.server, e
                ));
            }
        }
    }
}

/// Convert an advertised rmcp tool into a catalog descriptor
pub fn descriptor_from_tool(tool: Tool, server: &str) -> ToolDescriptor {
    let description = tool
        .description
        .as_deref()
        .map(str::to_string)
        .unwrap_or_default();

    ToolDescriptor::new(tool.name.to_string(), description, server)
        .with_schema(Value::Object((*tool.input_schema).clone()))
}

/// Fold a `tools/call` result into a `ToolOutput`, or an error when flagged
pub fn output_from_result(result: CallToolResult, server: &str) -> McpResult<ToolOutput> {
    let text = result
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.clone()),
            other => serde_json::to_string(other).ok(),
        })
        .collect::<Vec<_>>()
        .join("\n");

    if result.is_error.unwrap_or(false) {
        return Err(McpError::ServerReported(text));
    }

    Ok(ToolOutput {
        server: server.to_string(),
        text,
        structured: result.structured_content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NoOpLogger;
    use serde_json::json;

    fn result_from(value: Value) -> CallToolResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_descriptor_from_tool() {
        let tool: Tool = serde_json::from_value(json!({
            "name": "list_files",
            "description": "List files in a directory",
            "inputSchema": {
                "type": "object",
                "properties": { "path": { "type": "string" } }
            }
        }))
        .unwrap();

        let desc = descriptor_from_tool(tool, "files");
        assert_eq!(desc.name, "list_files");
        assert_eq!(desc.server, "files");
        assert_eq!(desc.description, "List files in a directory");
        assert_eq!(desc.input_schema["properties"]["path"]["type"], "string");
    }

    #[test]
    fn test_output_joins_text_content() {
        let result = result_from(json!({
            "content": [
                { "type": "text", "text": "a.txt" },
                { "type": "text", "text": "b.txt" }
            ]
        }));

        let output = output_from_result(result, "files").unwrap();
        assert_eq!(output.server, "files");
        assert_eq!(output.text, "a.txt\nb.txt");
        assert!(output.structured.is_none());
    }

    #[test]
    fn test_flagged_result_is_server_error() {
        let result = result_from(json!({
            "content": [{ "type": "text", "text": "no such directory" }],
            "isError": true
        }));

        assert_eq!(
            output_from_result(result, "files"),
            Err(McpError::ServerReported("no such directory".to_string()))
        );
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let config = ServerConfig::new("ghost", "toolchat-definitely-not-a-command-xyz");
        let err = McpClient::connect_stdio(&config, Arc::new(NoOpLogger::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Spawn { .. }));
    }
}
