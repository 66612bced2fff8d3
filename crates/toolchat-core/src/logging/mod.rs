//! Logging abstractions injected into every component

mod traits;
mod noop;
mod memory;
mod tracing_logger;

pub use traits::Logger;
pub use noop::NoOpLogger;
pub use memory::{LogLevel, MemoryLogger};
pub use tracing_logger::TracingLogger;
