//! Diagnostic sinks used while resolving and bootstrapping.
//!
//! The [`Logger`] is threaded through resolution explicitly: the environment
//! overlay reports malformed values through whichever logger the options
//! installed, so there is no process-wide default to set up front.

use crate::config::LogLevel;
use std::fmt;
use std::sync::Arc;

/// Sink for configuration diagnostics.
///
/// `fatal` receives errors the embedding application must not miss.
/// Implementations decide what "fatal" means; the default [`TracingLogger`]
/// only logs and never terminates the process.
pub trait Logger: Send + Sync {
    /// Reports an unrecoverable configuration problem.
    fn fatal(&self, message: &str);

    /// Reports a diagnostic message.
    fn debug(&self, message: &str);
}

/// Shared handle to a [`Logger`].
pub type SharedLogger = Arc<dyn Logger>;

/// Default logger backed by the `tracing` crate.
///
/// Debug messages are emitted only when the configured level is
/// [`LogLevel::Debug`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger {
    level: LogLevel,
}

impl TracingLogger {
    /// Creates a logger for the given level.
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl Logger for TracingLogger {
    fn fatal(&self, message: &str) {
        tracing::error!(target: "otelconfig", "{message}");
    }

    fn debug(&self, message: &str) {
        if self.level == LogLevel::Debug {
            tracing::debug!(target: "otelconfig", "{message}");
        }
    }
}

/// Receives non-fatal errors raised by installed pipelines.
pub trait ErrorHandler: Send + Sync {
    /// Handles an error.
    fn handle(&self, error: &(dyn std::error::Error + 'static));
}

/// Shared handle to an [`ErrorHandler`].
pub type SharedErrorHandler = Arc<dyn ErrorHandler>;

/// Error handler that forwards to a logger's debug sink.
pub struct LoggingErrorHandler {
    logger: SharedLogger,
}

impl LoggingErrorHandler {
    /// Creates a handler writing to `logger`.
    pub fn new(logger: SharedLogger) -> Self {
        Self { logger }
    }
}

impl ErrorHandler for LoggingErrorHandler {
    fn handle(&self, error: &(dyn std::error::Error + 'static)) {
        self.logger.debug(&format!("error: {error}"));
    }
}

impl fmt::Debug for LoggingErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingErrorHandler").finish_non_exhaustive()
    }
}
