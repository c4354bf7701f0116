//! Error types for the gateway core.
//!
//! Each component surfaces its own enum; conversions between them happen at
//! the seams via `#[from]`. Per-connector failures are localized: they update
//! the owning record and surface on the issuing CnC request, but never halt
//! the controller.

/// Errors raised by a connector instance.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectorError {
    /// A concrete connector did not supply the named lifecycle hook.
    #[error("connector does not implement `{0}`")]
    NotImplemented(&'static str),
    /// The supplied configuration is not usable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// An outbound payload was rejected before buffering.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// The connector's own start/stop/transfer machinery failed.
    #[error("{0}")]
    Failed(String),
}

/// Errors raised by the connector factory.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FactoryError {
    /// The type name was absent or empty.
    #[error("connector type name must be a non-empty string")]
    InvalidType,
    /// The connector id was absent or empty.
    #[error("connector id must be a non-empty string")]
    InvalidId,
    /// No builder is registered under the given type name.
    #[error("unknown connector type `{0}`")]
    UnknownType(String),
    /// The module loader could not resolve a module reference.
    #[error("cannot load connector module `{0}`: {1}")]
    ModuleLoad(String, String),
}

/// Errors raised while loading, validating, or persisting the config document.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        /// Path that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid JSON.
    #[error("failed to parse config file: {0}")]
    Parse(#[source] serde_json::Error),
    /// A required top-level section is missing or not a mapping.
    #[error("config section `{section}` is missing or not a mapping")]
    Shape {
        /// Name of the offending section.
        section: &'static str,
    },
    /// A connector entry is not a `{type, config}` mapping.
    #[error("connector entry `{id}` is malformed: {reason}")]
    Entry {
        /// Connector id the entry belongs to.
        id: String,
        /// What was wrong with it.
        reason: String,
    },
    /// Persisting the document failed. Logged; the follow-up write still runs.
    #[error("failed to write config file: {0}")]
    Write(String),
}

/// Outcomes of the per-slot lifecycle pipeline guards and steps.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// An `init` was requested on a slot that already holds an instance.
    #[error("connector is already active")]
    AlreadyActive,
    /// A `stop` was requested on a slot with no instance.
    #[error("connector is not active")]
    NotActive,
    /// The shutdown gate is set; no new instances may be created.
    #[error("gateway is shutting down")]
    ShuttingDown,
    /// The slot has no configuration entry (it was deleted after enqueue).
    #[error("no configuration entry for connector")]
    ConfigMissing,
    /// Constructing the instance failed.
    #[error(transparent)]
    Factory(#[from] FactoryError),
    /// The instance's own lifecycle hook failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Errors reported on a CnC request by the command interpreter.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CommandError {
    /// The `category` argument is not `cloud` or `device`.
    #[error("invalid category `{0}`")]
    InvalidCategory(String),
    /// The `action` is not part of the command table.
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    /// A required argument is absent or of the wrong type.
    #[error("missing or invalid argument `{0}`")]
    MissingArg(&'static str),
    /// The targeted slot has no record.
    #[error("no connector record for {category} connector `{id}`")]
    NoSuchRecord {
        /// Targeted category.
        category: &'static str,
        /// Targeted id.
        id: String,
    },
    /// The targeted slot has no configuration entry.
    #[error("no configuration entry for {category} connector `{id}`")]
    NoSuchConfig {
        /// Targeted category.
        category: &'static str,
        /// Targeted id.
        id: String,
    },
    /// A lifecycle step failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// A connector call failed.
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    /// One or more lifecycle steps in a batch operation failed.
    #[error("{0}")]
    Batch(String),
}

/// Errors surfaced by the controller facade.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ControllerError {
    /// Reading, parsing, or validating the config file failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// One or more connectors failed to start during `init`.
    #[error("startup failed: {0}")]
    StartupFailed(String),
    /// One or more connectors failed to stop during `stop`.
    #[error("shutdown failed: {0}")]
    ShutdownFailed(String),
}
