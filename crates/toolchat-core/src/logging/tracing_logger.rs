//! Logger that forwards to `tracing`

use super::traits::Logger;

/// Forwards every message to the matching `tracing` macro.
///
/// The subscriber (format, filter, writer) is installed by the binary.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    target: &'static str,
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl TracingLogger {
    /// Create a tracing logger with the default target
    pub fn new() -> Self {
        Self { target: "toolchat" }
    }

    /// Create a tracing logger with a custom target label
    pub fn with_target(target: &'static str) -> Self {
        Self { target }
    }
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(component = self.target, "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(component = self.target, "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(component = self.target, "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(component = self.target, "{}", message);
    }
}
