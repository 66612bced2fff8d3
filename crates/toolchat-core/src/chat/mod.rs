//! Chat orchestration: the startup context and the streaming entry point

mod context;
mod orchestrator;

pub use context::{AppContext, StartupError};
pub use orchestrator::{ChatOrchestrator, ChatStream, HealthStatus, ServiceInfo, SERVICE_NAME};
