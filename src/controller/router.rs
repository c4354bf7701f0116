//! Event routing between connectors.
//!
//! One routing task runs per live connector instance, consuming the
//! instance's event channel. Device data fans out to every currently
//! instantiated cloud connector; log events from either category fan out the
//! same way; cloud data carries CnC command batches and is handed to the
//! interpreter. Fanout is best-effort: a failing cloud connector never
//! starves the others.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use super::ControllerInner;
use crate::connector::{Category, Connector, ConnectorEvent};
use crate::control::interpreter;
use crate::control::CncRequest;

pub(crate) async fn route_events(
    inner: Weak<ControllerInner>,
    category: Category,
    id: String,
    mut rx: mpsc::UnboundedReceiver<ConnectorEvent>,
) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else { return };
        match event {
            ConnectorEvent::Data(payload) => match category {
                Category::Device => fan_data_to_cloud(&inner, payload).await,
                Category::Cloud => dispatch_command_batch(&inner, &id, payload).await,
            },
            ConnectorEvent::Log(payload) => fan_log_to_cloud(&inner, payload).await,
        }
    }
}

async fn cloud_instances(inner: &Arc<ControllerInner>) -> Vec<Arc<dyn Connector>> {
    let state = inner.state.lock().await;
    state.cloud.values().filter_map(|record| record.instance.clone()).collect()
}

/// Deliver a device data payload to every instantiated cloud connector.
pub(crate) async fn fan_data_to_cloud(inner: &Arc<ControllerInner>, payload: Value) {
    for cloud in cloud_instances(inner).await {
        if let Err(err) = cloud.add_data(payload.clone(), "na") {
            tracing::debug!(target: "edgelink::router", id = %cloud.id(), "data fanout dropped: {err}");
        }
    }
}

/// Deliver a log payload to every instantiated cloud connector.
pub(crate) async fn fan_log_to_cloud(inner: &Arc<ControllerInner>, payload: Value) {
    for cloud in cloud_instances(inner).await {
        cloud.add_log_data(payload.clone());
    }
}

/// Interpret a cloud data payload as a batch of CnC commands.
///
/// The batch runs in its own task: a command that stops the issuing
/// connector (or the whole gateway) must not cancel its own handler when the
/// issuer's routing task winds down.
async fn dispatch_command_batch(inner: &Arc<ControllerInner>, issuer_id: &str, payload: Value) {
    let issuer = {
        let state = inner.state.lock().await;
        state.cloud.get(issuer_id).and_then(|record| record.instance.clone())
    };
    let Some(issuer) = issuer else { return };

    let commands = match payload {
        Value::Array(commands) if !commands.is_empty() => commands,
        other => {
            tracing::warn!(
                target: "edgelink::router",
                issuer = %issuer_id,
                "dropping cloud payload that is not a non-empty command sequence: {other}"
            );
            return;
        }
    };

    let inner = Arc::clone(inner);
    let issuer_id = issuer_id.to_string();
    tokio::spawn(async move {
        let mut config_mutated = false;
        for command in commands {
            let has_action = command
                .as_object()
                .map(|obj| obj.get("action").is_some_and(Value::is_string))
                .unwrap_or(false);
            if !has_action {
                tracing::warn!(
                    target: "edgelink::router",
                    issuer = %issuer_id,
                    "dropping command without a string `action`: {command}"
                );
                continue;
            }
            let request_id =
                command.get("requestId").and_then(Value::as_str).unwrap_or("na").to_string();
            let logger = inner.logger_provider.get_logger(&request_id);
            let request = CncRequest::new(command, Arc::clone(&issuer), logger);
            config_mutated |= interpreter::execute(&inner, &request).await;
        }
        if config_mutated {
            inner.schedule_config_write().await;
        }
    });
}
