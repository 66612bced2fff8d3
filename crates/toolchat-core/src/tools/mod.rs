//! Tool layer: subprocess MCP servers merged into one catalog
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  ToolSessionManager                          │
//! │    - connects every server concurrently      │
//! │    - isolates failures, initializes once     │
//! │                                              │
//! │  ToolRegistry                                │
//! │    - flat catalog, conflict policy           │
//! │    - routes calls to the owning server       │
//! └──────────────────────────────────────────────┘
//!           │
//!           │ MCP over stdio (tools/list, tools/call)
//!           ▼
//! ┌──────────────────────────────────────────────┐
//! │  ToolServerConnection (one per child)        │
//! │    - persistent or per-call sessions         │
//! └──────────────────────────────────────────────┘
//! ```

mod connection;
mod registry;
mod manager;
mod mock;

pub use connection::{
    ConnectError, ConnectionHandle, ConnectionOptions, ConnectionState, InvokeError,
    InvokeResult, SessionPolicy, ToolServer, ToolServerConnection,
};
pub use registry::{ConflictPolicy, RegistrationReport, ToolConflict, ToolRegistry};
pub use manager::{InitReport, ServerConnector, StdioConnector, ToolSessionManager};
pub use mock::{MockConnector, MockToolServer};
