#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # edgelink
//!
//! Core of an IoT edge gateway agent: a long-running runtime that bridges
//! *device connectors* (sensors, actuators, polled peripherals) and *cloud
//! connectors* (command-and-control, telemetry transports).
//!
//! ## What the controller does
//!
//! - Ingests device readings and fans them out to every live cloud connector
//! - Accepts command batches from the cloud and executes them against
//!   connectors or the gateway's own lifecycle
//! - Serializes lifecycle operations per connector slot, so concurrent
//!   start/stop/restart commands are safe
//! - Persists cloud-issued config mutations back to a single file through a
//!   coalescing single-flight writer, so reboots resume with the latest state
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! use edgelink::{
//!     Connector, ConnectorBuilder, ConnectorError, Controller, PollHandler, PollingConnector,
//!     StaticModuleLoader,
//! };
//!
//! struct Thermometer;
//!
//! #[async_trait]
//! impl PollHandler for Thermometer {
//!     async fn poll(&self) -> Result<Option<Value>, ConnectorError> {
//!         Ok(Some(json!({ "celsius": 21.5 })))
//!     }
//! }
//!
//! struct ThermometerBuilder;
//!
//! impl ConnectorBuilder for ThermometerBuilder {
//!     fn build(&self, id: &str) -> Arc<dyn Connector> {
//!         Arc::new(PollingConnector::new(id, Thermometer))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let loader = StaticModuleLoader::new()
//!         .register("builtin:thermometer", Arc::new(ThermometerBuilder));
//!     let controller = Controller::builder().loader(Arc::new(loader)).build();
//!     controller.init("/etc/edgelink/gateway.json", "boot").await?;
//!     Ok(())
//! }
//! ```
//!
//! Connector implementations plug in through the [`Connector`] trait (or the
//! [`PollingConnector`] wrapper for sampled peripherals); the gateway never
//! needs to know their wire protocols.

pub mod config;
pub mod connector;
pub mod control;
pub mod controller;
pub mod error;
pub mod factory;
pub mod logging;

pub use config::{ConfigDocument, ConfigPersister, FileConfigPersister, SerialWriter};
pub use connector::{
    Category, ChannelCloudConnector, Connector, ConnectorBase, ConnectorEvent, ConnectorState,
    PollHandler, PollingConnector,
};
pub use control::CncRequest;
pub use controller::{
    ConnectorSnapshot, Controller, ControllerBuilder, ControllerConfig, MaintenanceSignal,
};
pub use error::{
    CommandError, ConfigError, ConnectorError, ControllerError, FactoryError, LifecycleError,
};
pub use factory::{ConnectorBuilder, ConnectorFactory, ModuleLoader, StaticModuleLoader};
pub use logging::{
    GatewayLogger, LogLevel, LoggerProvider, NoopLogger, NoopLoggerProvider, TracingLogger,
    TracingLoggerProvider,
};
