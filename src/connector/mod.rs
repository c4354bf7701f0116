//! The connector lifecycle contract.
//!
//! A connector is a stateful bridge between the gateway and one peer: a cloud
//! control/telemetry service ([`Category::Cloud`]) or a local sensor,
//! actuator, or bus ([`Category::Device`]). Concrete connectors implement
//! [`Connector`] by embedding a [`ConnectorBase`] and supplying the
//! `on_start`/`on_stop` hooks; the provided methods drive the state machine,
//! the outbound buffer, and the event sink.
//!
//! Connectors emit [`ConnectorEvent`]s through an mpsc sender the controller
//! attaches after a successful init. Exactly one sink is attached per
//! instance; emissions with no sink attached are dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ConnectorError;
use crate::logging::{GatewayLogger, NoopLogger};

pub mod channel;
pub mod polling;

pub use channel::ChannelCloudConnector;
pub use polling::{PollHandler, PollingConnector};

/// The two kinds of connectors the gateway manages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Peer is an upstream control/telemetry service.
    Cloud,
    /// Peer is a local sensor, actuator, or bus.
    Device,
}

impl Category {
    /// Parse the wire spelling (`"cloud"` / `"device"`).
    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "cloud" => Some(Category::Cloud),
            "device" => Some(Category::Device),
            _ => None,
        }
    }

    /// Wire spelling of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Cloud => "cloud",
            Category::Device => "device",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a connector instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectorState {
    /// Not started, or stopped.
    #[default]
    Inactive,
    /// Successfully initialized.
    Active,
}

/// Events a connector emits toward the controller.
#[derive(Clone, Debug)]
pub enum ConnectorEvent {
    /// An opaque data payload. Device data is fanned out to cloud connectors;
    /// cloud data carries a CnC command batch.
    Data(Value),
    /// A log payload, fanned out to all cloud connectors.
    Log(Value),
}

/// Shared connector plumbing: identity, state, outbound buffer, logger, and
/// the event sink attached by the controller.
pub struct ConnectorBase {
    id: String,
    state: Mutex<ConnectorState>,
    buffer: Mutex<VecDeque<Value>>,
    logger: Mutex<Arc<dyn GatewayLogger>>,
    events: Mutex<Option<mpsc::UnboundedSender<ConnectorEvent>>>,
}

impl ConnectorBase {
    /// Create a base for the connector with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(ConnectorState::Inactive),
            buffer: Mutex::new(VecDeque::new()),
            logger: Mutex::new(Arc::new(NoopLogger)),
            events: Mutex::new(None),
        }
    }

    /// The connector id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectorState {
        *self.state.lock().expect("connector state lock poisoned")
    }

    pub(crate) fn set_state(&self, state: ConnectorState) {
        *self.state.lock().expect("connector state lock poisoned") = state;
    }

    /// The logger currently attached to this connector.
    pub fn logger(&self) -> Arc<dyn GatewayLogger> {
        Arc::clone(&self.logger.lock().expect("connector logger lock poisoned"))
    }

    pub(crate) fn set_logger(&self, logger: Arc<dyn GatewayLogger>) {
        *self.logger.lock().expect("connector logger lock poisoned") = logger;
    }

    /// Append an outbound payload to the buffer.
    pub fn push_outbound(&self, payload: Value) {
        self.buffer.lock().expect("connector buffer lock poisoned").push_back(payload);
    }

    /// Drain every buffered outbound payload, oldest first.
    pub fn drain_outbound(&self) -> Vec<Value> {
        self.buffer.lock().expect("connector buffer lock poisoned").drain(..).collect()
    }

    /// Number of payloads waiting in the outbound buffer.
    pub fn outbound_len(&self) -> usize {
        self.buffer.lock().expect("connector buffer lock poisoned").len()
    }

    /// Install the event sink. Replaces any previous sink.
    pub fn attach_events(&self, sink: mpsc::UnboundedSender<ConnectorEvent>) {
        *self.events.lock().expect("connector events lock poisoned") = Some(sink);
    }

    /// Remove the event sink; subsequent emissions are dropped.
    pub fn detach_events(&self) {
        *self.events.lock().expect("connector events lock poisoned") = None;
    }

    /// Emit a data event toward the controller, if a sink is attached.
    pub fn emit_data(&self, payload: Value) {
        self.emit(ConnectorEvent::Data(payload));
    }

    /// Emit a log event toward the controller, if a sink is attached.
    pub fn emit_log(&self, payload: Value) {
        self.emit(ConnectorEvent::Log(payload));
    }

    fn emit(&self, event: ConnectorEvent) {
        let guard = self.events.lock().expect("connector events lock poisoned");
        if let Some(sink) = guard.as_ref() {
            // Receiver gone means the controller detached mid-flight; drop.
            let _ = sink.send(event);
        }
    }
}

impl std::fmt::Debug for ConnectorBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorBase")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("buffered", &self.outbound_len())
            .finish()
    }
}

impl std::fmt::Debug for dyn Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.base().fmt(f)
    }
}

/// The contract every connector fulfills.
///
/// Implementations supply `base()` and the lifecycle hooks; everything else
/// has a provided implementation. The default hooks fail with
/// [`ConnectorError::NotImplemented`], which the controller treats as an
/// initialization error.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Shared plumbing for this connector.
    fn base(&self) -> &ConnectorBase;

    /// Start hook. Runs inside [`Connector::init`] after config validation.
    async fn on_start(&self, config: &Value) -> Result<Value, ConnectorError> {
        let _ = config;
        Err(ConnectorError::NotImplemented("start"))
    }

    /// Stop hook. Runs inside [`Connector::stop`].
    async fn on_stop(&self) -> Result<Value, ConnectorError> {
        Err(ConnectorError::NotImplemented("stop"))
    }

    /// Initialize the connector with `config`.
    ///
    /// Rejects `InvalidConfig` when `config` is not a mapping. On hook
    /// success the state becomes [`ConnectorState::Active`]; on failure it
    /// stays [`ConnectorState::Inactive`] and the error surfaces.
    async fn init(&self, config: &Value, request_id: &str) -> Result<Value, ConnectorError> {
        if !config.is_object() {
            return Err(ConnectorError::InvalidConfig("config must be a mapping".into()));
        }
        self.base()
            .logger()
            .debug(&format!("[{request_id}] initializing connector `{}`", self.base().id()));
        match self.on_start(config).await {
            Ok(payload) => {
                self.base().set_state(ConnectorState::Active);
                Ok(payload)
            }
            Err(err) => {
                self.base().set_state(ConnectorState::Inactive);
                Err(err)
            }
        }
    }

    /// Stop the connector. The state is [`ConnectorState::Inactive`] on
    /// either completion path.
    async fn stop(&self, request_id: &str) -> Result<Value, ConnectorError> {
        self.base()
            .logger()
            .debug(&format!("[{request_id}] stopping connector `{}`", self.base().id()));
        let result = self.on_stop().await;
        self.base().set_state(ConnectorState::Inactive);
        result
    }

    /// Enqueue an outbound payload. Rejects `InvalidPayload` when `payload`
    /// is not a mapping. The buffer is unbounded here; draining it is the
    /// implementation's concern.
    fn add_data(&self, payload: Value, request_id: &str) -> Result<(), ConnectorError> {
        if !payload.is_object() {
            return Err(ConnectorError::InvalidPayload("payload must be a mapping".into()));
        }
        self.base()
            .logger()
            .silly(&format!("[{request_id}] buffering payload for `{}`", self.base().id()));
        self.base().push_outbound(payload);
        Ok(())
    }

    /// Enqueue an outbound log payload. No-op by default; cloud connectors
    /// override this to deliver log records upstream.
    fn add_log_data(&self, payload: Value) {
        let _ = payload;
    }

    /// The connector id.
    fn id(&self) -> &str {
        self.base().id()
    }

    /// Whether the connector is currently [`ConnectorState::Active`].
    fn is_active(&self) -> bool {
        self.base().state() == ConnectorState::Active
    }

    /// Attach the logger obtained from the provider.
    fn set_logger(&self, logger: Arc<dyn GatewayLogger>) {
        self.base().set_logger(logger);
    }

    /// Install the controller's event sink.
    fn attach_events(&self, sink: mpsc::UnboundedSender<ConnectorEvent>) {
        self.base().attach_events(sink);
    }

    /// Remove the controller's event sink.
    fn detach_events(&self) {
        self.base().detach_events();
    }
}
