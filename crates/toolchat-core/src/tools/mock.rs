//! In-process tool servers for tests and offline demos

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::connection::{
    ConnectError, ConnectionHandle, ConnectionOptions, InvokeError, InvokeResult, ToolServer,
};
use super::manager::ServerConnector;
use crate::config::ServerConfig;
use crate::logging::Logger;
use crate::types::{ToolDescriptor, ToolOutput};

/// Scripted reply for one tool
#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Error(String),
    /// Never answers
    Hang,
}

/// Decrements the in-flight counter when the invocation future goes away
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A `ToolServer` that answers from a script
///
/// Tools without a scripted reply answer `"<tool> <arguments json>"`.
pub struct MockToolServer {
    name: String,
    tools: Vec<ToolDescriptor>,
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<(String, Value)>>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl MockToolServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            replies: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Publish a tool with an empty object schema
    pub fn with_tool(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.tools
            .push(ToolDescriptor::new(name, description, self.name.clone()));
        self
    }

    /// Publish a fully specified tool
    pub fn with_descriptor(mut self, mut descriptor: ToolDescriptor) -> Self {
        descriptor.server = self.name.clone();
        self.tools.push(descriptor);
        self
    }

    /// Fixed text reply for a tool
    pub fn with_reply(mut self, tool: impl Into<String>, text: impl Into<String>) -> Self {
        self.replies.insert(tool.into(), Reply::Text(text.into()));
        self
    }

    /// Server-reported error for a tool
    pub fn with_error(mut self, tool: impl Into<String>, message: impl Into<String>) -> Self {
        self.replies.insert(tool.into(), Reply::Error(message.into()));
        self
    }

    /// Invocations of `tool` never complete
    pub fn with_hang(mut self, tool: impl Into<String>) -> Self {
        self.replies.insert(tool.into(), Reply::Hang);
        self
    }

    /// Invocations started but not yet finished or dropped
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Every invocation received, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolServer for MockToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    async fn invoke(&self, tool: &str, arguments: Value) -> InvokeResult<ToolOutput> {
        if self.is_closed() {
            return Err(InvokeError::Transport {
                server: self.name.clone(),
                message: "connection is closed".to_string(),
            });
        }

        if !self.tools.iter().any(|t| t.name == tool) {
            return Err(InvokeError::NotFound {
                server: self.name.clone(),
                tool: tool.to_string(),
            });
        }

        self.calls.lock().push((tool.to_string(), arguments.clone()));
        let _in_flight = InFlight::enter(&self.in_flight);

        match self.replies.get(tool) {
            Some(Reply::Text(text)) => Ok(ToolOutput::text(&self.name, text)),
            Some(Reply::Error(message)) => Err(InvokeError::ServerReported {
                server: self.name.clone(),
                message: message.clone(),
            }),
            Some(Reply::Hang) => futures::future::pending().await,
            None => Ok(ToolOutput::text(&self.name, format!("{} {}", tool, arguments))),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A `ServerConnector` that hands out `MockToolServer`s by config name
#[derive(Default)]
pub struct MockConnector {
    servers: HashMap<String, Arc<MockToolServer>>,
    failures: HashMap<String, ConnectError>,
    delay: Duration,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `server` for the config with the same name
    pub fn with_server(mut self, server: Arc<MockToolServer>) -> Self {
        self.servers.insert(server.name.clone(), server);
        self
    }

    /// Fail the config named `name` with `error`
    pub fn with_failure(mut self, name: impl Into<String>, error: ConnectError) -> Self {
        self.failures.insert(name.into(), error);
        self
    }

    /// Wait `delay` before every connect completes
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of connect attempts so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerConnector for MockConnector {
    async fn connect(
        &self,
        config: &ServerConfig,
        _options: &ConnectionOptions,
        _logger: Arc<dyn Logger>,
    ) -> Result<ConnectionHandle, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(error) = self.failures.get(&config.name) {
            return Err(error.clone());
        }

        match self.servers.get(&config.name) {
            Some(server) => Ok(server.clone() as ConnectionHandle),
            None => Err(ConnectError::Spawn {
                server: config.name.clone(),
                message: format!("no mock server named '{}'", config.name),
            }),
        }
    }
}
