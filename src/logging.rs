//! Logger abstraction injected into connectors and CnC requests.
//!
//! The gateway does not pick a logging backend for its connectors; it hands
//! each of them a [`GatewayLogger`] obtained from an injected
//! [`LoggerProvider`]. The default provider forwards to `tracing`; a missing
//! provider degrades to [`NoopLogger`], so every level method is always safe
//! to call.

use std::sync::Arc;

/// Log severity levels understood by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Finest-grained tracing output.
    Silly,
    /// Developer diagnostics.
    Debug,
    /// Verbose operational detail.
    Verbose,
    /// Routine operational messages.
    Info,
    /// Something surprising but survivable.
    Warn,
    /// A failure that needs attention.
    Error,
}

impl LogLevel {
    /// Lowercase name used in formatted log records.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Silly => "silly",
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-id logger handed to connectors and CnC requests.
pub trait GatewayLogger: Send + Sync {
    /// Record a message at the given level.
    fn log(&self, level: LogLevel, message: &str);

    /// Log at `silly`.
    fn silly(&self, message: &str) {
        self.log(LogLevel::Silly, message);
    }
    /// Log at `debug`.
    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }
    /// Log at `verbose`.
    fn verbose(&self, message: &str) {
        self.log(LogLevel::Verbose, message);
    }
    /// Log at `info`.
    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }
    /// Log at `warn`.
    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }
    /// Log at `error`.
    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Produces a logger for a given connector or request id.
pub trait LoggerProvider: Send + Sync {
    /// Obtain a logger tagged with `id`.
    fn get_logger(&self, id: &str) -> Arc<dyn GatewayLogger>;
}

/// Logger that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl GatewayLogger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Provider that hands out [`NoopLogger`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLoggerProvider;

impl LoggerProvider for NoopLoggerProvider {
    fn get_logger(&self, _id: &str) -> Arc<dyn GatewayLogger> {
        Arc::new(NoopLogger)
    }
}

/// Logger forwarding to the `tracing` ecosystem, tagging records with its id.
#[derive(Clone, Debug)]
pub struct TracingLogger {
    id: String,
}

impl TracingLogger {
    /// Create a logger tagged with `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl GatewayLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Silly => tracing::trace!(target: "edgelink", id = %self.id, "{message}"),
            LogLevel::Debug => tracing::debug!(target: "edgelink", id = %self.id, "{message}"),
            LogLevel::Verbose => tracing::debug!(target: "edgelink", id = %self.id, verbose = true, "{message}"),
            LogLevel::Info => tracing::info!(target: "edgelink", id = %self.id, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "edgelink", id = %self.id, "{message}"),
            LogLevel::Error => tracing::error!(target: "edgelink", id = %self.id, "{message}"),
        }
    }
}

/// Default provider: a [`TracingLogger`] per id.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLoggerProvider;

impl LoggerProvider for TracingLoggerProvider {
    fn get_logger(&self, id: &str) -> Arc<dyn GatewayLogger> {
        Arc::new(TracingLogger::new(id))
    }
}
