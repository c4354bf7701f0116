//! The controller: a supervised runtime owning both connector collections.
//!
//! The controller reads the config file, constructs connectors through the
//! factory, serializes lifecycle operations per slot, routes data and log
//! events between connectors, executes the CnC protocol received through
//! cloud connectors, and persists config mutations back to disk.
//!
//! All controller state (the records of both categories plus the config
//! document) lives behind one async mutex; lifecycle awaits never hold it.
//! The shutdown flag is an orthogonal gate: once set, queued `init` steps
//! refuse to create new instances.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::writer::{ConfigPersister, FileConfigPersister, SerialWriter};
use crate::config::ConfigDocument;
use crate::connector::{Category, Connector};
use crate::error::{ConfigError, ControllerError, LifecycleError};
use crate::factory::{resolve_module_path, ConnectorBuilder, ConnectorFactory, ModuleLoader, StaticModuleLoader};
use crate::logging::{LoggerProvider, TracingLoggerProvider};

pub(crate) mod router;
pub(crate) mod slot;

use slot::{ConnectorRecord, SlotPipeline, StepKind};

/// Signal emitted after a `maintenance_action` has stopped all connectors.
#[derive(Clone, Debug)]
pub struct MaintenanceSignal {
    /// The opaque maintenance command from the cloud.
    pub command: Value,
    /// Correlation id of the issuing request.
    pub request_id: String,
}

/// Static controller configuration.
#[derive(Clone, Debug, Default)]
pub struct ControllerConfig {
    /// Base path joined onto `./`-relative connector module references.
    pub module_base_path: String,
}

pub(crate) struct GatewayState {
    pub(crate) config: ConfigDocument,
    pub(crate) cloud: HashMap<String, ConnectorRecord>,
    pub(crate) device: HashMap<String, ConnectorRecord>,
}

impl GatewayState {
    pub(crate) fn records(&self, category: Category) -> &HashMap<String, ConnectorRecord> {
        match category {
            Category::Cloud => &self.cloud,
            Category::Device => &self.device,
        }
    }

    pub(crate) fn records_mut(&mut self, category: Category) -> &mut HashMap<String, ConnectorRecord> {
        match category {
            Category::Cloud => &mut self.cloud,
            Category::Device => &mut self.device,
        }
    }

    pub(crate) fn record(&self, category: Category, id: &str) -> Option<&ConnectorRecord> {
        self.records(category).get(id)
    }

    pub(crate) fn record_mut(&mut self, category: Category, id: &str) -> Option<&mut ConnectorRecord> {
        self.records_mut(category).get_mut(id)
    }
}

pub(crate) struct ControllerInner {
    pub(crate) state: tokio::sync::Mutex<GatewayState>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) active: AtomicBool,
    pub(crate) factory: ConnectorFactory,
    pub(crate) loader: Arc<dyn ModuleLoader>,
    pub(crate) logger_provider: Arc<dyn LoggerProvider>,
    pub(crate) writer: Mutex<Option<SerialWriter>>,
    pub(crate) persister_override: Option<Arc<dyn ConfigPersister>>,
    pub(crate) maintenance: broadcast::Sender<MaintenanceSignal>,
    pub(crate) module_base_path: String,
}

impl ControllerInner {
    /// Resolve module references and load builders for every configured type.
    /// Unloadable types are skipped with a warning; constructing them later
    /// fails `UnknownType`.
    pub(crate) fn build_type_map(
        &self,
        types: &BTreeMap<String, String>,
    ) -> HashMap<String, Arc<dyn ConnectorBuilder>> {
        let mut map = HashMap::new();
        for (name, module) in types {
            let resolved = resolve_module_path(module, &self.module_base_path);
            match self.loader.load(&resolved) {
                Ok(builder) => {
                    map.insert(name.clone(), builder);
                }
                Err(err) => {
                    tracing::warn!(target: "edgelink", "skipping connector type `{name}`: {err}");
                }
            }
        }
        map
    }

    /// Create the record (and its pipeline worker) for a slot if absent.
    pub(crate) fn ensure_record(
        inner: &Arc<Self>,
        state: &mut GatewayState,
        category: Category,
        id: &str,
    ) {
        if !state.records(category).contains_key(id) {
            let pipeline = SlotPipeline::spawn(Arc::downgrade(inner), category, id.to_string());
            state.records_mut(category).insert(id.to_string(), ConnectorRecord::new(pipeline));
        }
    }

    /// Snapshot the config document and hand it to the serial writer.
    pub(crate) async fn schedule_config_write(&self) {
        let snapshot = {
            let state = self.state.lock().await;
            state.config.to_value()
        };
        let writer = self.writer.lock().expect("writer lock poisoned").clone();
        if let Some(writer) = writer {
            writer.schedule(snapshot);
        }
    }
}

/// Snapshot of one live connector slot.
#[derive(Clone)]
pub struct ConnectorSnapshot {
    /// The live instance.
    pub instance: Arc<dyn Connector>,
    /// True while an init/stop is in flight on the slot.
    pub action_pending: bool,
    /// Payload or error of the last settled lifecycle step.
    pub last_result: Option<Result<Value, String>>,
    /// Configured type name, when the config entry still exists.
    pub type_name: Option<String>,
    /// Configured connector config, when the config entry still exists.
    pub config: Option<Value>,
}

/// Builder for [`Controller`].
pub struct ControllerBuilder {
    config: ControllerConfig,
    loader: Arc<dyn ModuleLoader>,
    logger_provider: Arc<dyn LoggerProvider>,
    persister: Option<Arc<dyn ConfigPersister>>,
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self {
            config: ControllerConfig::default(),
            loader: Arc::new(StaticModuleLoader::new()),
            logger_provider: Arc::new(TracingLoggerProvider),
            persister: None,
        }
    }
}

impl ControllerBuilder {
    /// Set the static controller configuration.
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the base path for `./`-relative module references.
    pub fn module_base_path(mut self, base: impl Into<String>) -> Self {
        self.config.module_base_path = base.into();
        self
    }

    /// Inject the module loader resolving connector type references.
    pub fn loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Inject the logger provider handed to connectors and requests.
    pub fn logger_provider(mut self, provider: Arc<dyn LoggerProvider>) -> Self {
        self.logger_provider = provider;
        self
    }

    /// Override config persistence (defaults to rewriting the config file
    /// passed to [`Controller::init`]).
    pub fn persister(mut self, persister: Arc<dyn ConfigPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Build an inactive controller.
    pub fn build(self) -> Controller {
        let (maintenance, _) = broadcast::channel(16);
        Controller {
            inner: Arc::new(ControllerInner {
                state: tokio::sync::Mutex::new(GatewayState {
                    config: ConfigDocument::default(),
                    cloud: HashMap::new(),
                    device: HashMap::new(),
                }),
                shutdown: AtomicBool::new(false),
                active: AtomicBool::new(false),
                factory: ConnectorFactory::new(),
                loader: self.loader,
                logger_provider: self.logger_provider,
                writer: Mutex::new(None),
                persister_override: self.persister,
                maintenance,
                module_base_path: self.config.module_base_path,
            }),
        }
    }
}

/// The gateway controller facade.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    /// Start building a controller.
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::default()
    }

    /// Whether the controller reached `ACTIVE` through `init`.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Whether the shutdown gate is set.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Subscribe to maintenance signals.
    pub fn subscribe_maintenance(&self) -> broadcast::Receiver<MaintenanceSignal> {
        self.inner.maintenance.subscribe()
    }

    /// Read, validate, and apply the config file, then start every
    /// configured connector. Resolves once all of them started; rejects
    /// `StartupFailed` when any of them did not.
    pub async fn init(&self, config_path: &str, request_id: &str) -> Result<(), ControllerError> {
        let inner = &self.inner;
        inner.shutdown.store(false, Ordering::SeqCst);

        let raw = tokio::fs::read_to_string(config_path).await.map_err(|source| {
            ConfigError::Read { path: config_path.to_string(), source }
        })?;
        let parsed: Value = serde_json::from_str(&raw).map_err(ConfigError::Parse)?;
        let document = ConfigDocument::from_value(&parsed)?;

        {
            let persister = inner
                .persister_override
                .clone()
                .unwrap_or_else(|| Arc::new(FileConfigPersister::new(config_path)));
            *inner.writer.lock().expect("writer lock poisoned") = Some(SerialWriter::new(persister));
        }

        let pending = {
            let mut state = inner.state.lock().await;
            state.config = document;
            let types = inner.build_type_map(&state.config.connector_types);
            inner.factory.initialize(types, Some(Arc::clone(&inner.logger_provider)));

            let mut pending = Vec::new();
            for category in [Category::Cloud, Category::Device] {
                let ids: Vec<String> = state.config.section(category).keys().cloned().collect();
                for id in ids {
                    ControllerInner::ensure_record(inner, &mut state, category, &id);
                    let record = state.record(category, &id).expect("record just ensured");
                    pending.push((category, id.clone(), record.pipeline.submit(StepKind::Init, request_id)));
                }
            }
            pending
        };

        let results = futures::future::join_all(
            pending.into_iter().map(|(category, id, rx)| async move { (category, id, rx.await) }),
        )
        .await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|(category, id, outcome)| match outcome {
                Ok(Ok(_)) => None,
                Ok(Err(err)) => Some(format!("{category}/{id}: {err}")),
                Err(_) => Some(format!("{category}/{id}: pipeline closed")),
            })
            .collect();

        if failures.is_empty() {
            inner.active.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(ControllerError::StartupFailed(failures.join("; ")))
        }
    }

    /// Set the shutdown gate and stop every connector in both categories.
    /// Slots that were never started count as already stopped.
    pub async fn stop(&self, request_id: &str) -> Result<(), ControllerError> {
        let inner = &self.inner;
        inner.shutdown.store(true, Ordering::SeqCst);

        let pending = {
            let state = inner.state.lock().await;
            let mut pending = Vec::new();
            for category in [Category::Cloud, Category::Device] {
                for (id, record) in state.records(category) {
                    pending.push((category, id.clone(), record.pipeline.submit(StepKind::Stop, request_id)));
                }
            }
            pending
        };

        let results = futures::future::join_all(
            pending.into_iter().map(|(category, id, rx)| async move { (category, id, rx.await) }),
        )
        .await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|(category, id, outcome)| match outcome {
                Ok(Ok(_)) => None,
                Ok(Err(LifecycleError::NotActive)) => None,
                Ok(Err(err)) => Some(format!("{category}/{id}: {err}")),
                Err(_) => Some(format!("{category}/{id}: pipeline closed")),
            })
            .collect();

        if failures.is_empty() {
            inner.active.store(false, Ordering::SeqCst);
            Ok(())
        } else {
            Err(ControllerError::ShutdownFailed(failures.join("; ")))
        }
    }

    async fn snapshot(&self, category: Category) -> HashMap<String, ConnectorSnapshot> {
        let state = self.inner.state.lock().await;
        state
            .records(category)
            .iter()
            .filter_map(|(id, record)| {
                let instance = record.instance.clone()?;
                let entry = state.config.entry(category, id);
                Some((
                    id.clone(),
                    ConnectorSnapshot {
                        instance,
                        action_pending: record.action_pending,
                        last_result: record.last_result.clone(),
                        type_name: entry
                            .and_then(|e| e.get("type"))
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        config: entry.and_then(|e| e.get("config")).cloned(),
                    },
                ))
            })
            .collect()
    }

    /// Live cloud connector slots, keyed by id.
    pub async fn cloud_connectors(&self) -> HashMap<String, ConnectorSnapshot> {
        self.snapshot(Category::Cloud).await
    }

    /// Live device connector slots, keyed by id.
    pub async fn device_connectors(&self) -> HashMap<String, ConnectorSnapshot> {
        self.snapshot(Category::Device).await
    }
}
