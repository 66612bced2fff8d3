//! Flat tool catalog across every connected server
//!
//! The ToolRegistry is the central component for:
//! - Merging per-server descriptor lists into one namespace
//! - Resolving name collisions by policy
//! - Routing invocations to the owning server
//! - Turning model tool calls into tool results

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::connection::{ConnectionHandle, InvokeError, InvokeResult, ToolServer};
use crate::logging::Logger;
use crate::providers::ToolInvoker;
use crate::types::{ToolCall, ToolDescriptor, ToolOutput, ToolResult};

/// What to do when two servers publish the same tool name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the first registration
    #[default]
    Reject,
    /// Replace the earlier registration in place
    Override,
}

/// A name collision resolved during registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolConflict {
    pub tool: String,
    /// Server whose descriptor stays in the catalog
    pub kept_server: String,
    /// Server whose descriptor was dropped
    pub rejected_server: String,
}

/// Outcome of registering one server's descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub server: String,
    pub accepted: Vec<String>,
    pub conflicts: Vec<ToolConflict>,
}

struct Entry {
    descriptor: ToolDescriptor,
    server: Weak<dyn ToolServer>,
}

/// Tool registry: ordered `name → (server, descriptor)` entries
pub struct ToolRegistry {
    entries: RwLock<Vec<Entry>>,
    policy: ConflictPolicy,
    logger: Arc<dyn Logger>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new(policy: ConflictPolicy, logger: Arc<dyn Logger>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            policy,
            logger,
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Merge a server's descriptors into the catalog
    pub fn register(
        &self,
        server: &ConnectionHandle,
        descriptors: Vec<ToolDescriptor>,
    ) -> RegistrationReport {
        let server_name = server.name().to_string();
        let weak = Arc::downgrade(server);
        let mut report = RegistrationReport {
            server: server_name.clone(),
            ..Default::default()
        };

        let mut entries = self.entries.write();

        for mut descriptor in descriptors {
            descriptor.server = server_name.clone();
            let name = descriptor.name.clone();

            let existing = entries.iter().position(|e| e.descriptor.name == name);
            let Some(pos) = existing else {
                entries.push(Entry {
                    descriptor,
                    server: weak.clone(),
                });
                report.accepted.push(name);
                continue;
            };

            let owner = entries[pos].descriptor.server.clone();
            if owner == server_name {
                // Same server listing a name twice: last one wins
                entries[pos] = Entry {
                    descriptor,
                    server: weak.clone(),
                };
                continue;
            }

            match self.policy {
                ConflictPolicy::Reject => {
                    self.logger.warn(&format!(
                        "[ToolRegistry] Tool '{}' from '{}' rejected: already provided by '{}'",
                        name, server_name, owner
                    ));
                    report.conflicts.push(ToolConflict {
                        tool: name,
                        kept_server: owner,
                        rejected_server: server_name.clone(),
                    });
                }
                ConflictPolicy::Override => {
                    self.logger.warn(&format!(
                        "[ToolRegistry] Tool '{}' from '{}' overrides the one from '{}'",
                        name, server_name, owner
                    ));
                    entries[pos] = Entry {
                        descriptor,
                        server: weak.clone(),
                    };
                    report.accepted.push(name.clone());
                    report.conflicts.push(ToolConflict {
                        tool: name,
                        kept_server: server_name.clone(),
                        rejected_server: owner,
                    });
                }
            }
        }

        self.logger.info(&format!(
            "[ToolRegistry] Registered {} tools from '{}'",
            report.accepted.len(),
            server_name
        ));

        report
    }

    /// Drop every entry owned by `server`; returns how many were removed
    pub fn unregister_server(&self, server: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.descriptor.server != server);
        before - entries.len()
    }

    /// Registration-ordered snapshot of the catalog
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.entries
            .read()
            .iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    pub fn tool_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tool_count() == 0
    }

    /// Name of the server that owns `tool`
    pub fn server_of(&self, tool: &str) -> Option<String> {
        self.entries
            .read()
            .iter()
            .find(|e| e.descriptor.name == tool)
            .map(|e| e.descriptor.server.clone())
    }

    /// Route an invocation to the owning server
    pub async fn invoke(&self, tool: &str, arguments: Value) -> InvokeResult<ToolOutput> {
        let (server_name, weak) = {
            let entries = self.entries.read();
            let entry = entries
                .iter()
                .find(|e| e.descriptor.name == tool)
                .ok_or_else(|| InvokeError::Unknown(tool.to_string()))?;
            (entry.descriptor.server.clone(), entry.server.clone())
        };

        let server = weak.upgrade().ok_or_else(|| InvokeError::Transport {
            server: server_name,
            message: "server connection was dropped".to_string(),
        })?;

        self.logger.info(&format!(
            "[ToolRegistry] Calling tool: {} on '{}'",
            tool,
            server.name()
        ));

        server.invoke(tool, arguments).await
    }

    /// Execute a tool call from the model; errors become error results
    pub async fn execute_tool_call(&self, tool_call: &ToolCall) -> ToolResult {
        match self.invoke(&tool_call.name, tool_call.input.clone()).await {
            Ok(output) => ToolResult::success(&tool_call.id, output.to_model_content()),
            Err(e) => {
                self.logger
                    .warn(&format!("[ToolRegistry] Tool call {} failed: {}", tool_call.name, e));
                ToolResult::error(&tool_call.id, format!("Error: {}", e))
            }
        }
    }

    /// Execute tool calls sequentially, in order
    pub async fn execute_tool_calls(&self, tool_calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            results.push(self.execute_tool_call(call).await);
        }
        results
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn execute_tool_call(&self, call: &ToolCall) -> ToolResult {
        ToolRegistry::execute_tool_call(self, call).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("policy", &self.policy)
            .field("tools", &self.tool_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, MemoryLogger, NoOpLogger};
    use crate::tools::MockToolServer;
    use serde_json::json;

    fn handle(server: MockToolServer) -> ConnectionHandle {
        Arc::new(server)
    }

    fn names(catalog: &[ToolDescriptor]) -> Vec<(&str, &str)> {
        catalog
            .iter()
            .map(|t| (t.name.as_str(), t.server.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn test_disjoint_servers_route_by_owner() {
        let registry = ToolRegistry::new(ConflictPolicy::Reject, Arc::new(NoOpLogger::new()));
        let files = handle(
            MockToolServer::new("files")
                .with_tool("list_files", "List files")
                .with_reply("list_files", "a.txt"),
        );
        let web = handle(
            MockToolServer::new("web")
                .with_tool("fetch", "Fetch a URL")
                .with_reply("fetch", "<html>"),
        );

        let r1 = registry.register(&files, files.list_tools());
        let r2 = registry.register(&web, web.list_tools());
        assert_eq!(r1.accepted, vec!["list_files"]);
        assert_eq!(r2.accepted, vec!["fetch"]);
        assert!(r1.conflicts.is_empty() && r2.conflicts.is_empty());

        let catalog = registry.catalog();
        assert_eq!(names(&catalog), vec![("list_files", "files"), ("fetch", "web")]);
        assert_eq!(registry.server_of("fetch").as_deref(), Some("web"));

        let out = registry.invoke("list_files", json!({})).await.unwrap();
        assert_eq!(out.server, "files");
        let out = registry.invoke("fetch", json!({"url": "x"})).await.unwrap();
        assert_eq!(out.server, "web");
    }

    #[tokio::test]
    async fn test_reject_keeps_first() {
        let logger = Arc::new(MemoryLogger::new());
        let registry = ToolRegistry::new(ConflictPolicy::Reject, logger.clone());
        let a = handle(MockToolServer::new("a").with_tool("read", "A").with_reply("read", "from a"));
        let b = handle(MockToolServer::new("b").with_tool("read", "B").with_reply("read", "from b"));

        registry.register(&a, a.list_tools());
        let report = registry.register(&b, b.list_tools());

        assert!(report.accepted.is_empty());
        assert_eq!(
            report.conflicts,
            vec![ToolConflict {
                tool: "read".to_string(),
                kept_server: "a".to_string(),
                rejected_server: "b".to_string(),
            }]
        );
        assert_eq!(registry.tool_count(), 1);
        assert_eq!(registry.invoke("read", json!({})).await.unwrap().text, "from a");
        assert!(logger.contains(LogLevel::Warn, "'read'"));
    }

    #[tokio::test]
    async fn test_override_replaces_in_place() {
        let logger = Arc::new(MemoryLogger::new());
        let registry = ToolRegistry::new(ConflictPolicy::Override, logger.clone());
        let a = handle(
            MockToolServer::new("a")
                .with_tool("read", "A")
                .with_tool("write", "A")
                .with_reply("read", "from a"),
        );
        let b = handle(MockToolServer::new("b").with_tool("read", "B").with_reply("read", "from b"));

        registry.register(&a, a.list_tools());
        let report = registry.register(&b, b.list_tools());

        assert_eq!(report.accepted, vec!["read"]);
        assert_eq!(report.conflicts[0].rejected_server, "a");
        // Position preserved
        assert_eq!(
            names(&registry.catalog()),
            vec![("read", "b"), ("write", "a")]
        );
        assert_eq!(registry.invoke("read", json!({})).await.unwrap().text, "from b");
        assert!(logger.contains(LogLevel::Warn, "overrides"));
    }

    #[tokio::test]
    async fn test_unknown_and_dropped_servers() {
        let registry = ToolRegistry::new(ConflictPolicy::Reject, Arc::new(NoOpLogger::new()));
        assert!(matches!(
            registry.invoke("nope", json!({})).await,
            Err(InvokeError::Unknown(_))
        ));

        let files = handle(MockToolServer::new("files").with_tool("list_files", ""));
        registry.register(&files, files.list_tools());
        drop(files);

        assert!(matches!(
            registry.invoke("list_files", json!({})).await,
            Err(InvokeError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn test_unregister_server() {
        let registry = ToolRegistry::new(ConflictPolicy::Reject, Arc::new(NoOpLogger::new()));
        let a = handle(MockToolServer::new("a").with_tool("one", "").with_tool("two", ""));
        let b = handle(MockToolServer::new("b").with_tool("three", ""));
        registry.register(&a, a.list_tools());
        registry.register(&b, b.list_tools());

        assert_eq!(registry.unregister_server("a"), 2);
        assert_eq!(names(&registry.catalog()), vec![("three", "b")]);
        assert_eq!(registry.unregister_server("a"), 0);
    }

    #[tokio::test]
    async fn test_execute_tool_calls_folds_errors() {
        let registry = ToolRegistry::new(ConflictPolicy::Reject, Arc::new(NoOpLogger::new()));
        let files = handle(
            MockToolServer::new("files")
                .with_tool("list_files", "")
                .with_tool("stat", "")
                .with_reply("list_files", "a.txt")
                .with_error("stat", "permission denied"),
        );
        registry.register(&files, files.list_tools());

        let results = registry
            .execute_tool_calls(&[
                ToolCall::new("c1", "list_files", json!({})),
                ToolCall::new("c2", "stat", json!({})),
                ToolCall::new("c3", "missing", json!({})),
            ])
            .await;

        assert_eq!(results[0], ToolResult::success("c1", "a.txt"));
        assert!(results[1].is_error);
        assert!(results[1].content.contains("permission denied"));
        assert!(results[2].is_error);
        assert!(results[2].content.contains("Unknown tool"));
    }
}
