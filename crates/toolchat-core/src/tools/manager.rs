//! Owns every tool-server connection: concurrent startup, failure isolation,
//! lazy initialization and shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::OnceCell;

use super::connection::{
    ConnectError, ConnectionHandle, ConnectionOptions, ConnectionState, ToolServerConnection,
};
use super::registry::{ConflictPolicy, RegistrationReport, ToolConflict, ToolRegistry};
use crate::config::{ServerConfig, ToolSettings};
use crate::logging::Logger;
use crate::types::ToolDescriptor;

/// Turns a server config into a connected `ToolServer`
#[async_trait]
pub trait ServerConnector: Send + Sync {
    async fn connect(
        &self,
        config: &ServerConfig,
        options: &ConnectionOptions,
        logger: Arc<dyn Logger>,
    ) -> Result<ConnectionHandle, ConnectError>;
}

/// Launches servers as child processes speaking MCP over stdio
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioConnector;

#[async_trait]
impl ServerConnector for StdioConnector {
    async fn connect(
        &self,
        config: &ServerConfig,
        options: &ConnectionOptions,
        logger: Arc<dyn Logger>,
    ) -> Result<ConnectionHandle, ConnectError> {
        let connection =
            ToolServerConnection::connect(config.clone(), options.clone(), logger).await?;
        Ok(connection as ConnectionHandle)
    }
}

const SHUT_DOWN_DURING_STARTUP: &str = "manager shut down during startup";

/// Result of the one-time startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// `(server, registered tool count)` for every connected server
    pub ready: Vec<(String, usize)>,
    /// `(server, error)` for every server that failed to come up
    pub failed: Vec<(String, String)>,
    pub conflicts: Vec<ToolConflict>,
}

impl InitReport {
    /// Whether at least one configured server is unavailable
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn tool_count(&self) -> usize {
        self.ready.iter().map(|(_, n)| n).sum()
    }
}

/// Tool session manager
pub struct ToolSessionManager {
    configs: Vec<ServerConfig>,
    options: ConnectionOptions,
    connector: Arc<dyn ServerConnector>,
    registry: Arc<ToolRegistry>,
    connections: RwLock<Vec<ConnectionHandle>>,
    /// Set under the `connections` write lock once shutdown has begun
    shut_down: AtomicBool,
    init: OnceCell<InitReport>,
    logger: Arc<dyn Logger>,
}

impl ToolSessionManager {
    /// Manager that launches servers over stdio
    pub fn new(configs: Vec<ServerConfig>, settings: &ToolSettings, logger: Arc<dyn Logger>) -> Self {
        Self::with_connector(configs, settings, Arc::new(StdioConnector), logger)
    }

    /// Manager with an injected connector
    pub fn with_connector(
        configs: Vec<ServerConfig>,
        settings: &ToolSettings,
        connector: Arc<dyn ServerConnector>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let registry = Arc::new(ToolRegistry::new(settings.conflict_policy, logger.clone()));
        Self {
            configs,
            options: ConnectionOptions::from(settings),
            connector,
            registry,
            connections: RwLock::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            init: OnceCell::new(),
            logger,
        }
    }

    pub fn registry(&self) -> Arc<ToolRegistry> {
        self.registry.clone()
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.registry.policy()
    }

    /// Current merged catalog
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.registry.catalog()
    }

    pub fn server_configs(&self) -> &[ServerConfig] {
        &self.configs
    }

    /// Report of the startup, if it has run
    pub fn init_report(&self) -> Option<&InitReport> {
        self.init.get()
    }

    /// Connect every configured server exactly once
    ///
    /// Concurrent callers wait for the same startup. Individual failures are
    /// recorded in the report; this never fails as a whole.
    pub async fn ensure_initialized(&self) -> &InitReport {
        self.init.get_or_init(|| self.initialize()).await
    }

    async fn initialize(&self) -> InitReport {
        if self.configs.is_empty() {
            self.logger
                .info("[ToolSessionManager] No tool servers configured");
            return InitReport::default();
        }

        if self.is_shut_down() {
            self.logger
                .warn("[ToolSessionManager] Shut down before startup, no servers started");
            return InitReport {
                failed: self
                    .configs
                    .iter()
                    .map(|c| (c.name.clone(), SHUT_DOWN_DURING_STARTUP.to_string()))
                    .collect(),
                ..InitReport::default()
            };
        }

        self.logger.info(&format!(
            "[ToolSessionManager] Starting {} tool servers",
            self.configs.len()
        ));

        let attempts = self.configs.iter().map(|config| {
            self.connector
                .connect(config, &self.options, self.logger.clone())
        });
        let results = join_all(attempts).await;

        let mut report = InitReport::default();
        for (config, result) in self.configs.iter().zip(results) {
            match result {
                Ok(handle) => {
                    let registration = {
                        let mut connections = self.connections.write();
                        if self.is_shut_down() {
                            None
                        } else {
                            let registration = self.registry.register(&handle, handle.list_tools());
                            connections.push(handle.clone());
                            Some(registration)
                        }
                    };

                    match registration {
                        Some(registration) => {
                            report
                                .ready
                                .push((config.name.clone(), registration.accepted.len()));
                            report.conflicts.extend(registration.conflicts);
                        }
                        None => {
                            self.logger.warn(&format!(
                                "[ToolSessionManager] Server '{}' connected after shutdown, closing",
                                config.name
                            ));
                            handle.close().await;
                            report
                                .failed
                                .push((config.name.clone(), SHUT_DOWN_DURING_STARTUP.to_string()));
                        }
                    }
                }
                Err(e) => {
                    self.logger.error(&format!(
                        "[ToolSessionManager] Server '{}' unavailable: {}",
                        config.name, e
                    ));
                    report.failed.push((config.name.clone(), e.to_string()));
                }
            }
        }

        self.logger.info(&format!(
            "[ToolSessionManager] {} of {} servers ready, {} tools",
            report.ready.len(),
            self.configs.len(),
            self.registry.tool_count()
        ));

        report
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn connection(&self, server: &str) -> Option<ConnectionHandle> {
        self.connections
            .read()
            .iter()
            .find(|c| c.name() == server)
            .cloned()
    }

    /// Re-list one server's tools and re-register them
    pub async fn refresh_server(&self, server: &str) -> Result<RegistrationReport, ConnectError> {
        let handle = self
            .connection(server)
            .ok_or_else(|| ConnectError::InvalidState {
                server: server.to_string(),
                state: ConnectionState::Uninitialized,
            })?;

        let tools = handle.refresh().await?;
        self.registry.unregister_server(server);
        Ok(self.registry.register(&handle, tools))
    }

    /// Close every connection and clear the catalog; idempotent
    ///
    /// Servers that finish connecting after this point are closed by the
    /// startup itself instead of being registered.
    pub async fn shutdown(&self) {
        let connections: Vec<ConnectionHandle> = {
            let mut connections = self.connections.write();
            self.shut_down.store(true, Ordering::SeqCst);
            std::mem::take(&mut *connections)
        };
        if connections.is_empty() {
            return;
        }

        self.logger.info(&format!(
            "[ToolSessionManager] Shutting down {} tool servers",
            connections.len()
        ));

        join_all(connections.iter().map(|c| c.close())).await;

        for connection in &connections {
            self.registry.unregister_server(connection.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, MemoryLogger};
    use crate::tools::{MockConnector, MockToolServer};
    use serde_json::json;
    use std::time::Duration;

    fn configs(names: &[&str]) -> Vec<ServerConfig> {
        names
            .iter()
            .map(|n| ServerConfig::new(*n, format!("mcp-{}", n)))
            .collect()
    }

    #[tokio::test]
    async fn test_failed_server_is_isolated() {
        let files = Arc::new(
            MockToolServer::new("files")
                .with_tool("list_files", "List files")
                .with_reply("list_files", "a.txt"),
        );
        let web = Arc::new(MockToolServer::new("web").with_tool("fetch", "Fetch"));
        let connector = Arc::new(
            MockConnector::new()
                .with_server(files.clone())
                .with_server(web)
                .with_failure(
                    "broken",
                    ConnectError::Handshake {
                        server: "broken".to_string(),
                        message: "bad protocol version".to_string(),
                    },
                ),
        );
        let logger = Arc::new(MemoryLogger::new());

        let manager = ToolSessionManager::with_connector(
            configs(&["files", "broken", "web"]),
            &ToolSettings::default(),
            connector.clone(),
            logger.clone(),
        );

        let report = manager.ensure_initialized().await;
        assert!(report.is_degraded());
        assert_eq!(
            report.ready,
            vec![("files".to_string(), 1), ("web".to_string(), 1)]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert_eq!(report.tool_count(), 2);
        assert!(logger.contains(LogLevel::Error, "broken"));

        let out = manager
            .registry()
            .invoke("list_files", json!({}))
            .await
            .unwrap();
        assert_eq!(out.text, "a.txt");
    }

    #[tokio::test]
    async fn test_initializes_once() {
        let connector = Arc::new(
            MockConnector::new().with_server(Arc::new(MockToolServer::new("files").with_tool("ls", ""))),
        );
        let manager = ToolSessionManager::with_connector(
            configs(&["files"]),
            &ToolSettings::default(),
            connector.clone(),
            Arc::new(MemoryLogger::new()),
        );

        let (a, b) = tokio::join!(manager.ensure_initialized(), manager.ensure_initialized());
        assert_eq!(a, b);
        manager.ensure_initialized().await;

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(manager.catalog().len(), 1);
        assert!(!manager.init_report().unwrap().is_degraded());
    }

    #[tokio::test]
    async fn test_conflicts_are_reported() {
        let connector = Arc::new(
            MockConnector::new()
                .with_server(Arc::new(MockToolServer::new("a").with_tool("read", "")))
                .with_server(Arc::new(MockToolServer::new("b").with_tool("read", ""))),
        );
        let manager = ToolSessionManager::with_connector(
            configs(&["a", "b"]),
            &ToolSettings::default(),
            connector,
            Arc::new(MemoryLogger::new()),
        );

        let report = manager.ensure_initialized().await;
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].kept_server, "a");
        assert_eq!(manager.registry().server_of("read").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let files = Arc::new(MockToolServer::new("files").with_tool("ls", ""));
        let connector = Arc::new(MockConnector::new().with_server(files.clone()));
        let manager = ToolSessionManager::with_connector(
            configs(&["files"]),
            &ToolSettings::default(),
            connector,
            Arc::new(MemoryLogger::new()),
        );

        manager.ensure_initialized().await;
        assert_eq!(manager.catalog().len(), 1);

        manager.shutdown().await;
        assert!(files.is_closed());
        assert!(manager.catalog().is_empty());

        // Second shutdown is a no-op
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_during_startup_closes_late_servers() {
        let files = Arc::new(MockToolServer::new("files").with_tool("ls", ""));
        let web = Arc::new(MockToolServer::new("web").with_tool("fetch", ""));
        let connector = Arc::new(
            MockConnector::new()
                .with_server(files.clone())
                .with_server(web.clone())
                .with_delay(Duration::from_millis(200)),
        );
        let logger = Arc::new(MemoryLogger::new());
        let manager = Arc::new(ToolSessionManager::with_connector(
            configs(&["files", "web"]),
            &ToolSettings::default(),
            connector,
            logger.clone(),
        ));

        let startup = tokio::spawn({
            let manager = manager.clone();
            async move { manager.ensure_initialized().await.clone() }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.shutdown().await;

        let report = startup.await.unwrap();
        assert!(report.ready.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert!(report
            .failed
            .iter()
            .all(|(_, message)| message == SHUT_DOWN_DURING_STARTUP));
        assert!(files.is_closed());
        assert!(web.is_closed());
        assert!(manager.catalog().is_empty());
        assert!(logger.contains(LogLevel::Warn, "after shutdown"));
    }

    #[tokio::test]
    async fn test_startup_after_shutdown_spawns_nothing() {
        let connector = Arc::new(
            MockConnector::new().with_server(Arc::new(MockToolServer::new("files").with_tool("ls", ""))),
        );
        let manager = ToolSessionManager::with_connector(
            configs(&["files"]),
            &ToolSettings::default(),
            connector.clone(),
            Arc::new(MemoryLogger::new()),
        );

        manager.shutdown().await;
        let report = manager.ensure_initialized().await;
        assert_eq!(connector.connect_count(), 0);
        assert!(report.is_degraded());
        assert!(manager.catalog().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_server() {
        let files = Arc::new(MockToolServer::new("files").with_tool("ls", "").with_tool("cat", ""));
        let connector = Arc::new(MockConnector::new().with_server(files));
        let manager = ToolSessionManager::with_connector(
            configs(&["files"]),
            &ToolSettings::default(),
            connector,
            Arc::new(MemoryLogger::new()),
        );
        manager.ensure_initialized().await;

        let report = manager.refresh_server("files").await.unwrap();
        assert_eq!(report.accepted, vec!["ls", "cat"]);
        assert_eq!(manager.catalog().len(), 2);

        assert!(matches!(
            manager.refresh_server("missing").await,
            Err(ConnectError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_servers() {
        let manager = ToolSessionManager::new(
            Vec::new(),
            &ToolSettings::default(),
            Arc::new(MemoryLogger::new()),
        );
        let report = manager.ensure_initialized().await;
        assert!(!report.is_degraded());
        assert!(manager.catalog().is_empty());
    }
}
