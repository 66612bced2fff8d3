//! One tool server: process lifecycle, descriptor snapshot and invocation policy

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::{ServerConfig, ToolSettings};
use crate::logging::Logger;
use crate::mcp::{McpClient, McpError};
use crate::types::{ToolDescriptor, ToolOutput};

/// Lifecycle of a connection
///
/// `Uninitialized → Connecting → Ready → Closed`, or `Connecting → Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Ready,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How sessions are used for invocations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// One long-lived session; invocations are serialized
    #[default]
    Persistent,
    /// A fresh session per invocation, closed afterwards
    PerCall,
}

/// Per-connection limits and policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub session_policy: SessionPolicy,
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
    pub max_concurrent_spawns: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&ToolSettings::default())
    }
}

impl From<&ToolSettings> for ConnectionOptions {
    fn from(settings: &ToolSettings) -> Self {
        Self {
            session_policy: settings.session_policy,
            handshake_timeout: Duration::from_secs(settings.handshake_timeout_secs),
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
            max_concurrent_spawns: settings.max_concurrent_spawns.max(1),
        }
    }
}

impl ConnectionOptions {
    fn permits(&self) -> usize {
        match self.session_policy {
            SessionPolicy::Persistent => 1,
            SessionPolicy::PerCall => self.max_concurrent_spawns.max(1),
        }
    }
}

/// Errors while bringing a server up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("[{server}] failed to spawn: {message}")]
    Spawn { server: String, message: String },

    #[error("[{server}] handshake failed: {message}")]
    Handshake { server: String, message: String },

    #[error("[{server}] tools/list failed: {message}")]
    ListTools { server: String, message: String },

    #[error("[{server}] handshake timed out after {timeout:?}")]
    Timeout { server: String, timeout: Duration },

    #[error("[{server}] invalid state: {state}")]
    InvalidState { server: String, state: ConnectionState },
}

impl ConnectError {
    /// Map a session error raised while listing tools
    fn from_mcp(server: &str, err: McpError) -> Self {
        let server = server.to_string();
        match err {
            McpError::Spawn { message, .. } => ConnectError::Spawn { server, message },
            McpError::Handshake(message) => ConnectError::Handshake { server, message },
            other => ConnectError::ListTools {
                server,
                message: other.to_string(),
            },
        }
    }
}

/// Errors from invoking a tool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("Tool '{tool}' is not published by server '{server}'")]
    NotFound { server: String, tool: String },

    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Transport failure on '{server}': {message}")]
    Transport { server: String, message: String },

    #[error("Server '{server}' reported: {message}")]
    ServerReported { server: String, message: String },
}

impl InvokeError {
    fn from_mcp(server: &str, err: McpError) -> Self {
        let server = server.to_string();
        match err {
            McpError::ServerReported(message) => InvokeError::ServerReported { server, message },
            other => InvokeError::Transport {
                server,
                message: other.to_string(),
            },
        }
    }
}

pub type InvokeResult<T> = Result<T, InvokeError>;

/// A source of tools the registry can route calls to
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Configured server name
    fn name(&self) -> &str;

    /// Descriptor snapshot taken at connect time
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Re-query the server's tool list
    async fn refresh(&self) -> Result<Vec<ToolDescriptor>, ConnectError> {
        Ok(self.list_tools())
    }

    /// Invoke one tool
    async fn invoke(&self, tool: &str, arguments: Value) -> InvokeResult<ToolOutput>;

    /// Terminate the server; idempotent
    async fn close(&self);
}

/// Shared handle to a connected server
pub type ConnectionHandle = Arc<dyn ToolServer>;

/// Connection to one subprocess MCP server
pub struct ToolServerConnection {
    config: ServerConfig,
    options: ConnectionOptions,
    state: RwLock<ConnectionState>,
    tools: RwLock<Vec<ToolDescriptor>>,
    session: Mutex<Option<Arc<McpClient>>>,
    permits: Semaphore,
    logger: Arc<dyn Logger>,
}

impl ToolServerConnection {
    /// Create an unconnected connection
    pub fn new(config: ServerConfig, options: ConnectionOptions, logger: Arc<dyn Logger>) -> Self {
        let permits = Semaphore::new(options.permits());
        Self {
            config,
            options,
            state: RwLock::new(ConnectionState::Uninitialized),
            tools: RwLock::new(Vec::new()),
            session: Mutex::new(None),
            permits,
            logger,
        }
    }

    /// Create and establish in one step
    pub async fn connect(
        config: ServerConfig,
        options: ConnectionOptions,
        logger: Arc<dyn Logger>,
    ) -> Result<Arc<Self>, ConnectError> {
        let connection = Arc::new(Self::new(config, options, logger));
        connection.establish().await?;
        Ok(connection)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Spawn, handshake and list tools, bounded by the handshake timeout
    pub async fn establish(&self) -> Result<(), ConnectError> {
        {
            let mut state = self.state.write();
            match *state {
                ConnectionState::Uninitialized | ConnectionState::Failed => {
                    *state = ConnectionState::Connecting;
                }
                other => {
                    return Err(ConnectError::InvalidState {
                        server: self.config.name.clone(),
                        state: other,
                    })
                }
            }
        }

        self.logger
            .info(&format!("[ToolServerConnection] Connecting to '{}'", self.name()));

        let result = tokio::time::timeout(self.options.handshake_timeout, self.open_and_list()).await;

        let (client, tools) = match result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Failed);
                return Err(e);
            }
            Err(_) => {
                self.set_state(ConnectionState::Failed);
                return Err(ConnectError::Timeout {
                    server: self.config.name.clone(),
                    timeout: self.options.handshake_timeout,
                });
            }
        };

        let mut client = match self.options.session_policy {
            SessionPolicy::Persistent => Some(client),
            SessionPolicy::PerCall => {
                client.close().await;
                None
            }
        };
        let tool_count = tools.len();

        // The session is stored under the state lock so close() either sees it
        // or has already marked the connection closed.
        let raced = {
            let mut state = self.state.write();
            if *state == ConnectionState::Connecting {
                if let Some(client) = client.take() {
                    *self.session.lock() = Some(Arc::new(client));
                }
                *self.tools.write() = tools;
                *state = ConnectionState::Ready;
                None
            } else {
                Some(*state)
            }
        };

        if let Some(state) = raced {
            // close() won the race; the session is ours to release
            if let Some(client) = client {
                client.close().await;
            }
            self.logger.warn(&format!(
                "[ToolServerConnection] '{}' closed during handshake",
                self.name()
            ));
            return Err(ConnectError::InvalidState {
                server: self.config.name.clone(),
                state,
            });
        }

        self.logger.info(&format!(
            "[ToolServerConnection] '{}' ready with {} tools",
            self.name(),
            tool_count
        ));
        Ok(())
    }

    #[cfg(test)]
    fn has_session(&self) -> bool {
        self.session.lock().is_some()
    }

    async fn open_and_list(&self) -> Result<(McpClient, Vec<ToolDescriptor>), ConnectError> {
        let client = McpClient::connect_stdio(&self.config, self.logger.clone())
            .await
            .map_err(|e| ConnectError::from_mcp(self.name(), e))?;

        let tools = client
            .list_tools()
            .await
            .map_err(|e| ConnectError::from_mcp(self.name(), e))?;

        Ok((client, tools))
    }

    /// Cached descriptor snapshot
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().clone()
    }

    /// Re-query the server and replace the snapshot
    pub async fn refresh(&self) -> Result<Vec<ToolDescriptor>, ConnectError> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(ConnectError::InvalidState {
                server: self.config.name.clone(),
                state,
            });
        }

        let tools = match self.options.session_policy {
            SessionPolicy::Persistent => {
                let client = self.persistent_session().map_err(|_| ConnectError::InvalidState {
                    server: self.config.name.clone(),
                    state: ConnectionState::Closed,
                })?;
                client
                    .list_tools()
                    .await
                    .map_err(|e| ConnectError::from_mcp(self.name(), e))?
            }
            SessionPolicy::PerCall => {
                let timeout = self.options.handshake_timeout;
                let (client, tools) = tokio::time::timeout(timeout, self.open_and_list())
                    .await
                    .map_err(|_| ConnectError::Timeout {
                        server: self.config.name.clone(),
                        timeout,
                    })??;
                client.close().await;
                tools
            }
        };

        self.logger.info(&format!(
            "[ToolServerConnection] '{}' refreshed: {} tools",
            self.name(),
            tools.len()
        ));

        *self.tools.write() = tools.clone();
        Ok(tools)
    }

    fn persistent_session(&self) -> InvokeResult<Arc<McpClient>> {
        self.session.lock().clone().ok_or_else(|| InvokeError::Transport {
            server: self.config.name.clone(),
            message: "session is closed".to_string(),
        })
    }

    /// Invoke a tool from the snapshot
    pub async fn invoke(&self, tool: &str, arguments: Value) -> InvokeResult<ToolOutput> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(InvokeError::Transport {
                server: self.config.name.clone(),
                message: format!("connection is {}", state),
            });
        }

        if !self.tools.read().iter().any(|t| t.name == tool) {
            return Err(InvokeError::NotFound {
                server: self.config.name.clone(),
                tool: tool.to_string(),
            });
        }

        // Closed semaphore means the connection was closed while waiting
        let _permit = self.permits.acquire().await.map_err(|_| InvokeError::Transport {
            server: self.config.name.clone(),
            message: "connection closed".to_string(),
        })?;

        self.logger.debug(&format!(
            "[ToolServerConnection] '{}' invoking {}",
            self.name(),
            tool
        ));

        let call_timeout = self.options.call_timeout;
        let timed_out = || InvokeError::Transport {
            server: self.config.name.clone(),
            message: format!("call timed out after {:?}", call_timeout),
        };

        match self.options.session_policy {
            SessionPolicy::Persistent => {
                let client = self.persistent_session()?;
                tokio::time::timeout(call_timeout, client.call_tool(tool, arguments))
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(|e| InvokeError::from_mcp(self.name(), e))
            }
            SessionPolicy::PerCall => {
                let client = tokio::time::timeout(
                    self.options.handshake_timeout,
                    McpClient::connect_stdio(&self.config, self.logger.clone()),
                )
                .await
                .map_err(|_| timed_out())?
                .map_err(|e| InvokeError::from_mcp(self.name(), e))?;

                let result = tokio::time::timeout(call_timeout, client.call_tool(tool, arguments))
                    .await
                    .map_err(|_| timed_out())
                    .and_then(|r| r.map_err(|e| InvokeError::from_mcp(self.name(), e)));

                client.close().await;
                result
            }
        }
    }

    /// Terminate the session; idempotent
    pub async fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }

        self.permits.close();

        let session = self.session.lock().take();
        if let Some(client) = session {
            client.close().await;
        }

        self.logger
            .info(&format!("[ToolServerConnection] '{}' closed", self.name()));
    }
}

#[async_trait]
impl ToolServer for ToolServerConnection {
    fn name(&self) -> &str {
        ToolServerConnection::name(self)
    }

    fn list_tools(&self) -> Vec<ToolDescriptor> {
        ToolServerConnection::list_tools(self)
    }

    async fn refresh(&self) -> Result<Vec<ToolDescriptor>, ConnectError> {
        ToolServerConnection::refresh(self).await
    }

    async fn invoke(&self, tool: &str, arguments: Value) -> InvokeResult<ToolOutput> {
        ToolServerConnection::invoke(self, tool, arguments).await
    }

    async fn close(&self) {
        ToolServerConnection::close(self).await
    }
}

impl std::fmt::Debug for ToolServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServerConnection")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("tools", &self.tools.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NoOpLogger;
    use serde_json::json;

    fn logger() -> Arc<dyn Logger> {
        Arc::new(NoOpLogger::new())
    }

    #[test]
    fn test_options_from_settings() {
        let mut settings = ToolSettings::default();
        settings.session_policy = SessionPolicy::PerCall;
        settings.max_concurrent_spawns = 3;
        settings.handshake_timeout_secs = 2;

        let options = ConnectionOptions::from(&settings);
        assert_eq!(options.session_policy, SessionPolicy::PerCall);
        assert_eq!(options.handshake_timeout, Duration::from_secs(2));
        assert_eq!(options.permits(), 3);

        assert_eq!(ConnectionOptions::default().permits(), 1);
    }

    #[tokio::test]
    async fn test_new_connection_is_uninitialized() {
        let conn = ToolServerConnection::new(
            ServerConfig::new("files", "mcp-files"),
            ConnectionOptions::default(),
            logger(),
        );
        assert_eq!(conn.state(), ConnectionState::Uninitialized);
        assert!(conn.list_tools().is_empty());

        let err = conn.invoke("list_files", json!({})).await.unwrap_err();
        assert!(matches!(err, InvokeError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_failed() {
        let err = ToolServerConnection::connect(
            ServerConfig::new("ghost", "toolchat-definitely-not-a-command-xyz"),
            ConnectionOptions::default(),
            logger(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectError::Spawn { ref server, .. } if server == "ghost"));

        let conn = ToolServerConnection::new(
            ServerConfig::new("ghost", "toolchat-definitely-not-a-command-xyz"),
            ConnectionOptions::default(),
            logger(),
        );
        assert!(conn.establish().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_server_times_out() {
        let options = ConnectionOptions {
            handshake_timeout: Duration::from_millis(200),
            ..ConnectionOptions::default()
        };
        let conn = ToolServerConnection::new(
            ServerConfig::new("mute", "sleep").with_args(["30"]),
            options,
            logger(),
        );

        let err = conn.establish().await.unwrap_err();
        assert!(matches!(err, ConnectError::Timeout { .. }));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let conn = ToolServerConnection::new(
            ServerConfig::new("files", "mcp-files"),
            ConnectionOptions::default(),
            logger(),
        );
        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);

        let err = conn.establish().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::InvalidState { state: ConnectionState::Closed, .. }
        ));
        assert!(conn.refresh().await.is_err());
    }

    /// Path of the stdio tool server built from `examples/stub_tool_server.rs`
    #[cfg(target_os = "linux")]
    fn stub_server_path() -> Option<std::path::PathBuf> {
        let exe = std::env::current_exe().ok()?;
        let path = exe
            .parent()?
            .parent()?
            .join("examples")
            .join(format!("stub_tool_server{}", std::env::consts::EXE_SUFFIX));
        if path.exists() {
            Some(path)
        } else {
            eprintln!("skipping: {} not built", path.display());
            None
        }
    }

    #[cfg(target_os = "linux")]
    fn stub_config(name: &str, pid_file: &std::path::Path) -> Option<ServerConfig> {
        let path = stub_server_path()?;
        Some(
            ServerConfig::new(name, path.to_string_lossy())
                .with_env("STUB_PID_FILE", pid_file.to_string_lossy()),
        )
    }

    #[cfg(target_os = "linux")]
    fn recorded_pids(pid_file: &std::path::Path) -> Vec<u32> {
        std::fs::read_to_string(pid_file)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    /// A process counts as gone once /proc has no entry or it is a zombie
    #[cfg(target_os = "linux")]
    fn process_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
        }
    }

    #[cfg(target_os = "linux")]
    async fn wait_until_gone(pid: u32) -> bool {
        for _ in 0..60 {
            if process_gone(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_persistent_session_against_stdio_server() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pids");
        let Some(config) = stub_config("stub", &pid_file) else {
            return;
        };

        let conn = ToolServerConnection::connect(config, ConnectionOptions::default(), logger())
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert!(conn.has_session());

        let names: Vec<String> = conn.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "fail", "slow"]);

        let output = conn.invoke("echo", json!({"text": "hello"})).await.unwrap();
        assert_eq!(output.text, "hello");
        assert_eq!(output.server, "stub");

        let err = conn.invoke("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, InvokeError::NotFound { ref tool, .. } if tool == "missing"));

        let err = conn.invoke("fail", json!({})).await.unwrap_err();
        assert!(matches!(err, InvokeError::ServerReported { ref message, .. } if message.contains("boom")));

        // One session serves both calls one after the other
        let (a, b) = tokio::join!(
            conn.invoke("slow", json!({"ms": 200})),
            conn.invoke("slow", json!({"ms": 200}))
        );
        assert_eq!(a.unwrap().text, "1");
        assert_eq!(b.unwrap().text, "1");

        let refreshed = conn.refresh().await.unwrap();
        assert_eq!(refreshed.len(), 3);

        let pids = recorded_pids(&pid_file);
        assert_eq!(pids.len(), 1);

        conn.close().await;
        assert!(!conn.has_session());
        assert!(wait_until_gone(pids[0]).await, "server {} still running", pids[0]);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_per_call_sessions_leave_no_process_behind() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pids");
        let Some(config) = stub_config("stub", &pid_file) else {
            return;
        };
        let options = ConnectionOptions {
            session_policy: SessionPolicy::PerCall,
            ..ConnectionOptions::default()
        };

        let conn = ToolServerConnection::connect(config, options, logger())
            .await
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Ready);
        assert!(!conn.has_session());
        assert_eq!(conn.list_tools().len(), 3);

        let first = conn.invoke("echo", json!({"text": "one"})).await.unwrap();
        let second = conn.invoke("echo", json!({"text": "two"})).await.unwrap();
        assert_eq!(first.text, "one");
        assert_eq!(second.text, "two");

        let err = conn.invoke("fail", json!({})).await.unwrap_err();
        assert!(matches!(err, InvokeError::ServerReported { .. }));

        // Handshake session plus one per invocation
        let pids = recorded_pids(&pid_file);
        assert_eq!(pids.len(), 4);
        let mut distinct = pids.clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 4);

        for pid in pids {
            assert!(wait_until_gone(pid).await, "per-call server {} still running", pid);
        }

        conn.close().await;
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_close_during_handshake_releases_session() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pids");
        let Some(config) = stub_config("slow-list", &pid_file) else {
            return;
        };
        let config = config.with_env("STUB_LIST_DELAY_MS", "500");

        let conn = Arc::new(ToolServerConnection::new(
            config,
            ConnectionOptions::default(),
            logger(),
        ));

        let establishing = tokio::spawn({
            let conn = conn.clone();
            async move { conn.establish().await }
        });

        // Wait until the process is up and tools/list is pending
        for _ in 0..40 {
            if !recorded_pids(&pid_file).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        conn.close().await;

        let err = establishing.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ConnectError::InvalidState { state: ConnectionState::Closed, .. }
        ));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.has_session());
        assert!(conn.list_tools().is_empty());

        let pids = recorded_pids(&pid_file);
        assert_eq!(pids.len(), 1);
        assert!(wait_until_gone(pids[0]).await, "server {} still running", pids[0]);
    }
}
