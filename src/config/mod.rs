//! The gateway configuration document.
//!
//! One JSON file holds everything the gateway needs to resume after a
//! reboot: the connector type registry and one section of connector entries
//! per category. The document is validated structurally on load (every
//! section must be a mapping); the per-connector `config` payloads stay
//! opaque so cloud-issued mutations round-trip unchanged.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::connector::Category;
use crate::error::ConfigError;

pub mod writer;

pub use writer::{ConfigPersister, FileConfigPersister, SerialWriter};

/// In-memory form of the persisted configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConfigDocument {
    /// Type name → module reference (registry key or `./`-relative path).
    #[serde(rename = "connectorTypes")]
    pub connector_types: BTreeMap<String, String>,
    /// Cloud connector entries, keyed by connector id.
    #[serde(rename = "cloudConnectors")]
    pub cloud_connectors: BTreeMap<String, Value>,
    /// Device connector entries, keyed by connector id.
    #[serde(rename = "deviceConnectors")]
    pub device_connectors: BTreeMap<String, Value>,
}

fn section_object<'v>(
    root: &'v Map<String, Value>,
    section: &'static str,
) -> Result<&'v Map<String, Value>, ConfigError> {
    root.get(section).and_then(Value::as_object).ok_or(ConfigError::Shape { section })
}

impl ConfigDocument {
    /// Validate and deep-copy a raw JSON document.
    ///
    /// All three top-level sections must be present mappings, and
    /// `connectorTypes` values must be strings. The first violation (checked
    /// in declaration order) is reported as [`ConfigError::Shape`] naming the
    /// section.
    pub fn from_value(raw: &Value) -> Result<Self, ConfigError> {
        let root = raw.as_object().ok_or(ConfigError::Shape { section: "connectorTypes" })?;

        let types = section_object(root, "connectorTypes")?;
        let mut connector_types = BTreeMap::new();
        for (name, module) in types {
            let module = module
                .as_str()
                .ok_or(ConfigError::Shape { section: "connectorTypes" })?;
            connector_types.insert(name.clone(), module.to_string());
        }

        let cloud = section_object(root, "cloudConnectors")?;
        let device = section_object(root, "deviceConnectors")?;

        Ok(Self {
            connector_types,
            cloud_connectors: cloud.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            device_connectors: device.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }

    /// Render the document as a JSON value (the persisted shape).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("config document serializes")
    }

    /// The connector section for `category`.
    pub fn section(&self, category: Category) -> &BTreeMap<String, Value> {
        match category {
            Category::Cloud => &self.cloud_connectors,
            Category::Device => &self.device_connectors,
        }
    }

    /// Mutable connector section for `category`.
    pub fn section_mut(&mut self, category: Category) -> &mut BTreeMap<String, Value> {
        match category {
            Category::Cloud => &mut self.cloud_connectors,
            Category::Device => &mut self.device_connectors,
        }
    }

    /// Look up one connector entry.
    pub fn entry(&self, category: Category, id: &str) -> Option<&Value> {
        self.section(category).get(id)
    }
}

/// Split a connector entry into `(type_name, config)`.
///
/// An entry is a mapping with a non-empty string `type`; `config` defaults to
/// an empty mapping when absent.
pub fn parse_entry(id: &str, entry: &Value) -> Result<(String, Value), ConfigError> {
    let obj = entry.as_object().ok_or_else(|| ConfigError::Entry {
        id: id.to_string(),
        reason: "entry must be a mapping".into(),
    })?;
    let type_name = obj
        .get("type")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ConfigError::Entry {
            id: id.to_string(),
            reason: "entry must name a connector `type`".into(),
        })?;
    let config = obj.get("config").cloned().unwrap_or_else(|| Value::Object(Map::new()));
    Ok((type_name.to_string(), config))
}

/// Deep-copy an entry with credentials redacted, keyed on the entry's type.
///
/// `CncCloud` entries lose `config.password`; `Http` entries lose
/// `config.headers.authorization`. Unknown types pass through unchanged.
pub fn sanitize_entry(entry: &Value) -> Value {
    let mut copy = entry.clone();
    let Some(type_name) = entry.get("type").and_then(Value::as_str) else {
        return copy;
    };
    match type_name {
        "CncCloud" => {
            if let Some(password) =
                copy.get_mut("config").and_then(|c| c.get_mut("password"))
            {
                *password = Value::String(String::new());
            }
        }
        "Http" => {
            if let Some(authorization) = copy
                .get_mut("config")
                .and_then(|c| c.get_mut("headers"))
                .and_then(|h| h.get_mut("authorization"))
            {
                *authorization = Value::String(String::new());
            }
        }
        _ => {}
    }
    copy
}
