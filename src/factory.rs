//! Connector factory: type-name registry → constructed instances.
//!
//! `connectorTypes` in the config maps type names to module references. A
//! module reference is either a registry key or a `./`-relative path resolved
//! against the controller's `module_base_path`; an injected [`ModuleLoader`]
//! turns the resolved reference into a [`ConnectorBuilder`]. The factory
//! itself only knows type names and builders.
//!
//! The registry is swapped wholesale on (re)initialization, so an
//! `update_connector_type` command rebinds a type without blocking concurrent
//! constructions.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::connector::Connector;
use crate::error::FactoryError;
use crate::logging::LoggerProvider;

/// Constructs connector instances for one registered type.
pub trait ConnectorBuilder: Send + Sync {
    /// Build a fresh, inactive instance with the given id.
    fn build(&self, id: &str) -> Arc<dyn Connector>;
}

/// Resolves a module reference to a connector builder.
///
/// The host decides what a module reference means; the gateway only resolves
/// `./`-relative references against its base path first.
pub trait ModuleLoader: Send + Sync {
    /// Load the builder registered under `module`.
    fn load(&self, module: &str) -> Result<Arc<dyn ConnectorBuilder>, FactoryError>;
}

/// Compile-time module registry: a fixed map of reference → builder.
#[derive(Default)]
pub struct StaticModuleLoader {
    modules: HashMap<String, Arc<dyn ConnectorBuilder>>,
}

impl StaticModuleLoader {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `builder` under `module`, replacing any previous binding.
    pub fn register(mut self, module: impl Into<String>, builder: Arc<dyn ConnectorBuilder>) -> Self {
        self.modules.insert(module.into(), builder);
        self
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(&self, module: &str) -> Result<Arc<dyn ConnectorBuilder>, FactoryError> {
        self.modules.get(module).cloned().ok_or_else(|| {
            FactoryError::ModuleLoad(module.to_string(), "not in module registry".into())
        })
    }
}

/// Join `./`-relative module references onto `base`; pass others through.
pub fn resolve_module_path(module: &str, base: &str) -> String {
    match module.strip_prefix("./") {
        Some(rest) if !base.is_empty() => Path::new(base).join(rest).to_string_lossy().into_owned(),
        _ => module.to_string(),
    }
}

/// Registry of connector type names, consulted by every path that constructs
/// a connector.
pub struct ConnectorFactory {
    types: ArcSwap<HashMap<String, Arc<dyn ConnectorBuilder>>>,
    provider: Mutex<Option<Arc<dyn LoggerProvider>>>,
}

impl Default for ConnectorFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorFactory {
    /// Create an empty factory. [`ConnectorFactory::initialize`] supplies the
    /// type map.
    pub fn new() -> Self {
        Self { types: ArcSwap::from_pointee(HashMap::new()), provider: Mutex::new(None) }
    }

    /// Replace the whole type registry and the logger provider.
    ///
    /// Constructions racing with an `initialize` observe either the old or
    /// the new map, never a mix.
    pub fn initialize(
        &self,
        types: HashMap<String, Arc<dyn ConnectorBuilder>>,
        provider: Option<Arc<dyn LoggerProvider>>,
    ) {
        self.types.store(Arc::new(types));
        *self.provider.lock().expect("factory provider lock poisoned") = provider;
    }

    /// Type names currently registered (sorted).
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.load().keys().cloned().collect();
        names.sort();
        names
    }

    /// Construct a connector of `type_name` with `id`, attaching a logger
    /// from the provider when one is present.
    pub fn create_connector(
        &self,
        type_name: &str,
        id: &str,
    ) -> Result<Arc<dyn Connector>, FactoryError> {
        if type_name.is_empty() {
            return Err(FactoryError::InvalidType);
        }
        if id.is_empty() {
            return Err(FactoryError::InvalidId);
        }
        let types = self.types.load();
        let builder =
            types.get(type_name).ok_or_else(|| FactoryError::UnknownType(type_name.to_string()))?;
        let connector = builder.build(id);
        let provider = self.provider.lock().expect("factory provider lock poisoned").clone();
        if let Some(provider) = provider {
            connector.set_logger(provider.get_logger(id));
        }
        Ok(connector)
    }
}

impl std::fmt::Debug for ConnectorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorFactory").field("types", &self.type_names()).finish()
    }
}
