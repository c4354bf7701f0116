#![allow(dead_code)]

//! Shared fixtures: an instrumented mock connector, an in-memory config
//! persister, and a booted-gateway harness driven through a mock cloud
//! connector.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use edgelink::{
    ConfigError, ConfigPersister, Connector, ConnectorBase, ConnectorBuilder, ConnectorError,
    Controller, StaticModuleLoader,
};
use tracing_subscriber::EnvFilter;

/// Install the test tracing subscriber once; `RUST_LOG` controls verbosity.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Counters and captures shared by every connector built from one
/// [`MockBuilder`], keyed by connector id.
#[derive(Default)]
pub struct MockStats {
    inits: Mutex<HashMap<String, usize>>,
    stops: Mutex<HashMap<String, usize>>,
    data: Mutex<HashMap<String, Vec<Value>>>,
    logs: Mutex<HashMap<String, Vec<Value>>>,
    fail_start: Mutex<HashSet<String>>,
    start_delay: Mutex<HashMap<String, Duration>>,
}

impl MockStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn init_count(&self, id: &str) -> usize {
        self.inits.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn stop_count(&self, id: &str) -> usize {
        self.stops.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    /// Payloads delivered to `id` through `add_data`.
    pub fn data_for(&self, id: &str) -> Vec<Value> {
        self.data.lock().unwrap().get(id).cloned().unwrap_or_default()
    }

    /// Envelopes delivered to `id` through `add_log_data`.
    pub fn envelopes_for(&self, id: &str) -> Vec<Value> {
        self.logs.lock().unwrap().get(id).cloned().unwrap_or_default()
    }

    /// The completion envelope for `request_id` on issuer `id`, if any.
    pub fn completion(&self, id: &str, request_id: &str) -> Option<Value> {
        self.envelopes_for(id)
            .into_iter()
            .find(|env| env["requestId"] == request_id && env["data"]["type"] == "complete")
    }

    /// Make the next starts of `id` fail.
    pub fn fail_start(&self, id: &str) {
        self.fail_start.lock().unwrap().insert(id.to_string());
    }

    /// Clear a start-failure marker.
    pub fn heal(&self, id: &str) {
        self.fail_start.lock().unwrap().remove(id);
    }

    /// Delay starts of `id` by `delay`.
    pub fn delay_start(&self, id: &str, delay: Duration) {
        self.start_delay.lock().unwrap().insert(id.to_string(), delay);
    }
}

/// Instrumented connector used for both categories in tests.
pub struct MockConnector {
    base: ConnectorBase,
    stats: Arc<MockStats>,
}

#[async_trait]
impl Connector for MockConnector {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }

    async fn on_start(&self, _config: &Value) -> Result<Value, ConnectorError> {
        let id = self.base.id().to_string();
        let delay = self.stats.start_delay.lock().unwrap().get(&id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.stats.fail_start.lock().unwrap().contains(&id) {
            return Err(ConnectorError::Failed("mock start refused".into()));
        }
        *self.stats.inits.lock().unwrap().entry(id.clone()).or_insert(0) += 1;
        Ok(json!({ "mock": id }))
    }

    async fn on_stop(&self) -> Result<Value, ConnectorError> {
        *self.stats.stops.lock().unwrap().entry(self.base.id().to_string()).or_insert(0) += 1;
        Ok(json!({}))
    }

    fn add_data(&self, payload: Value, _request_id: &str) -> Result<(), ConnectorError> {
        if !payload.is_object() {
            return Err(ConnectorError::InvalidPayload("payload must be a mapping".into()));
        }
        self.stats
            .data
            .lock()
            .unwrap()
            .entry(self.base.id().to_string())
            .or_default()
            .push(payload);
        Ok(())
    }

    fn add_log_data(&self, payload: Value) {
        self.stats
            .logs
            .lock()
            .unwrap()
            .entry(self.base.id().to_string())
            .or_default()
            .push(payload);
    }
}

/// Builds [`MockConnector`]s sharing one [`MockStats`].
pub struct MockBuilder {
    pub stats: Arc<MockStats>,
}

impl ConnectorBuilder for MockBuilder {
    fn build(&self, id: &str) -> Arc<dyn Connector> {
        Arc::new(MockConnector { base: ConnectorBase::new(id), stats: Arc::clone(&self.stats) })
    }
}

/// In-memory persister recording rendered snapshots; optionally gated so
/// tests control when a write is "in flight".
pub struct MemoryPersister {
    calls: Mutex<Vec<String>>,
    gate: Option<tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>>,
}

impl MemoryPersister {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { calls: Mutex::new(Vec::new()), gate: None })
    }

    /// A persister whose writes block until a permit is sent.
    pub fn gated() -> (Arc<Self>, mpsc::UnboundedSender<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let persister = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            gate: Some(tokio::sync::Mutex::new(rx)),
        });
        (persister, tx)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigPersister for MemoryPersister {
    async fn persist(&self, contents: String) -> Result<(), ConfigError> {
        self.calls.lock().unwrap().push(contents);
        if let Some(gate) = &self.gate {
            gate.lock().await.recv().await;
        }
        Ok(())
    }
}

/// A standard two-connector gateway config: one mock cloud connector `c1`
/// (plus any extras) and one mock device connector `d1`.
pub fn standard_config() -> Value {
    gateway_config(&[("c1", "Mock")], &[("d1", "Mock")])
}

/// Build a config document with mock entries for the given `(id, type)`
/// pairs.
pub fn gateway_config(cloud: &[(&str, &str)], device: &[(&str, &str)]) -> Value {
    let section = |entries: &[(&str, &str)]| -> Value {
        Value::Object(
            entries
                .iter()
                .map(|(id, ty)| (id.to_string(), json!({ "type": ty, "config": {} })))
                .collect(),
        )
    };
    json!({
        "connectorTypes": { "Mock": "builtin:mock" },
        "cloudConnectors": section(cloud),
        "deviceConnectors": section(device),
    })
}

/// A gateway wired to mock connectors and an in-memory persister.
pub struct Fixture {
    pub controller: Controller,
    pub stats: Arc<MockStats>,
    pub persister: Arc<MemoryPersister>,
    pub config_path: String,
    _dir: tempfile::TempDir,
}

impl Fixture {
    /// Fixture with the standard mock loader.
    pub fn new(config: Value) -> Self {
        let stats = MockStats::new();
        let loader = StaticModuleLoader::new()
            .register("builtin:mock", Arc::new(MockBuilder { stats: Arc::clone(&stats) }));
        Self::with_parts(config, loader, stats, MemoryPersister::new())
    }

    /// Fixture with a caller-assembled loader (extra types, path-resolved
    /// modules). The standard mock stats are still wired to `builtin:mock`
    /// if the loader registered them.
    pub fn with_parts(
        config: Value,
        loader: StaticModuleLoader,
        stats: Arc<MockStats>,
        persister: Arc<MemoryPersister>,
    ) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("create temp dir");
        let config_path = dir.path().join("gateway.json");
        std::fs::write(&config_path, config.to_string()).expect("write config fixture");

        let controller = Controller::builder()
            .loader(Arc::new(loader))
            .persister(persister.clone() as Arc<dyn ConfigPersister>)
            .build();

        Self {
            controller,
            stats,
            persister,
            config_path: config_path.to_string_lossy().into_owned(),
            _dir: dir,
        }
    }

    /// Init the controller and panic on failure.
    pub async fn boot(&self) {
        self.controller.init(&self.config_path, "boot").await.expect("gateway boots");
    }

    /// Emit a command batch through the cloud connector `issuer`.
    pub async fn issue(&self, issuer: &str, batch: Value) {
        let cloud = self.controller.cloud_connectors().await;
        let instance = cloud.get(issuer).expect("issuer is active").instance.clone();
        instance.base().emit_data(batch);
    }

    /// Issue a batch and wait for the completion envelope of `request_id`.
    pub async fn issue_and_await(&self, issuer: &str, batch: Value, request_id: &str) -> Value {
        self.issue(issuer, batch).await;
        self.await_completion(issuer, request_id).await
    }

    /// Wait for the completion envelope of `request_id` on `issuer`.
    pub async fn await_completion(&self, issuer: &str, request_id: &str) -> Value {
        for _ in 0..600 {
            if let Some(envelope) = self.stats.completion(issuer, request_id) {
                return envelope;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for completion of `{request_id}` on `{issuer}`");
    }
}

/// Poll until `cond` holds or a few seconds pass.
pub async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..600 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
