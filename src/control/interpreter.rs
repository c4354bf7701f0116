//! The CnC action table.
//!
//! Every command received through a cloud connector flows through
//! [`execute`]: acknowledge, log, dispatch on `action`, then complete the
//! request with the handler's outcome. Handlers that mutate the config
//! document report it, and the batch dispatcher schedules a single config
//! write per batch.
//!
//! Single-slot lifecycle handlers await the step outcome before completing;
//! `restart_connector` enqueues both steps without awaiting and relies on the
//! per-slot pipeline ordering for correctness.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::request::CncRequest;
use crate::config::sanitize_entry;
use crate::connector::Category;
use crate::controller::slot::StepKind;
use crate::controller::{ControllerInner, MaintenanceSignal};
use crate::error::{CommandError, LifecycleError};
use crate::logging::LogLevel;

/// A handler's result: the completion payload plus whether the config
/// document was mutated.
struct Outcome {
    response: Value,
    config_mutated: bool,
}

impl Outcome {
    fn ok(response: Value) -> Self {
        Self { response, config_mutated: false }
    }

    fn mutated(response: Value) -> Self {
        Self { response, config_mutated: true }
    }
}

/// Execute one command against the controller. Returns whether the config
/// document was mutated.
pub(crate) async fn execute(inner: &Arc<ControllerInner>, req: &CncRequest) -> bool {
    req.ack();
    req.log(LogLevel::Info, &format!("executing action `{}`", req.action()));
    match dispatch(inner, req).await {
        Ok(outcome) => {
            req.complete_ok(outcome.response);
            outcome.config_mutated
        }
        Err(err) => {
            req.complete_error(&err);
            false
        }
    }
}

async fn dispatch(inner: &Arc<ControllerInner>, req: &CncRequest) -> Result<Outcome, CommandError> {
    match req.action() {
        "stop_connector" => stop_connector(inner, req).await,
        "start_connector" => start_connector(inner, req).await,
        "restart_connector" => restart_connector(inner, req).await,
        "stop_all_connectors" => stop_all_connectors(inner, req).await,
        "start_all_connectors" => start_all_connectors(inner, req).await,
        "restart_all_connectors" => restart_all_connectors(inner, req).await,
        "list_connectors" => list_connectors(inner, req).await,
        "get_connector_config" => get_connector_config(inner, req).await,
        "send_data" => send_data(inner, req).await,
        "update_config" => update_config(inner, req).await,
        "delete_config" => delete_config(inner, req).await,
        "update_connector_type" => update_connector_type(inner, req).await,
        "maintenance_action" => maintenance_action(inner, req).await,
        other => Err(CommandError::UnknownAction(other.to_string())),
    }
}

fn categories_for(req: &CncRequest) -> Result<Vec<Category>, CommandError> {
    Ok(match req.optional_category()? {
        Some(category) => vec![category],
        None => vec![Category::Cloud, Category::Device],
    })
}

async fn await_steps(
    pending: Vec<(
        Category,
        String,
        tokio::sync::oneshot::Receiver<Result<Value, LifecycleError>>,
    )>,
    tolerate: impl Fn(&LifecycleError) -> bool,
) -> Result<(), CommandError> {
    let results = futures::future::join_all(
        pending.into_iter().map(|(category, id, rx)| async move { (category, id, rx.await) }),
    )
    .await;

    let failures: Vec<String> = results
        .into_iter()
        .filter_map(|(category, id, outcome)| match outcome {
            Ok(Ok(_)) => None,
            Ok(Err(err)) if tolerate(&err) => None,
            Ok(Err(err)) => Some(format!("{category}/{id}: {err}")),
            Err(_) => Some(format!("{category}/{id}: pipeline closed")),
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(CommandError::Batch(failures.join("; ")))
    }
}

async fn stop_connector(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let category = req.category()?;
    let id = req.str_arg("id")?;
    let rx = {
        let state = inner.state.lock().await;
        let record = state.record(category, id).ok_or_else(|| CommandError::NoSuchRecord {
            category: category.as_str(),
            id: id.to_string(),
        })?;
        record.pipeline.submit(StepKind::Stop, req.request_id())
    };
    let payload = rx
        .await
        .map_err(|_| CommandError::Batch("pipeline closed".into()))??;
    Ok(Outcome::ok(payload))
}

async fn start_connector(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let category = req.category()?;
    let id = req.str_arg("id")?;
    let rx = {
        let mut state = inner.state.lock().await;
        if state.config.entry(category, id).is_none() {
            return Err(CommandError::NoSuchConfig {
                category: category.as_str(),
                id: id.to_string(),
            });
        }
        ControllerInner::ensure_record(inner, &mut state, category, id);
        let record = state.record(category, id).expect("record just ensured");
        record.pipeline.submit(StepKind::Init, req.request_id())
    };
    let payload = rx
        .await
        .map_err(|_| CommandError::Batch("pipeline closed".into()))??;
    Ok(Outcome::ok(payload))
}

async fn restart_connector(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let category = req.category()?;
    let id = req.str_arg("id")?;
    let state = inner.state.lock().await;
    let record = state.record(category, id).ok_or_else(|| CommandError::NoSuchRecord {
        category: category.as_str(),
        id: id.to_string(),
    })?;
    // Enqueue both steps without awaiting; the pipeline's ordering makes the
    // init run only after the stop settles.
    let _ = record.pipeline.submit(StepKind::Stop, req.request_id());
    let _ = record.pipeline.submit(StepKind::Init, req.request_id());
    Ok(Outcome::ok(json!({})))
}

async fn stop_all_connectors(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let categories = categories_for(req)?;
    let pending = {
        let state = inner.state.lock().await;
        let mut pending = Vec::new();
        for category in categories {
            for (id, record) in state.records(category) {
                pending.push((category, id.clone(), record.pipeline.submit(StepKind::Stop, req.request_id())));
            }
        }
        pending
    };
    await_steps(pending, |err| matches!(err, LifecycleError::NotActive)).await?;
    Ok(Outcome::ok(json!({})))
}

async fn start_all_connectors(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let categories = categories_for(req)?;
    let pending = {
        let mut state = inner.state.lock().await;
        let mut pending = Vec::new();
        for category in categories {
            let ids: Vec<String> = state.config.section(category).keys().cloned().collect();
            for id in ids {
                ControllerInner::ensure_record(inner, &mut state, category, &id);
                let record = state.record(category, &id).expect("record just ensured");
                pending.push((category, id.clone(), record.pipeline.submit(StepKind::Init, req.request_id())));
            }
        }
        pending
    };
    await_steps(pending, |err| matches!(err, LifecycleError::AlreadyActive)).await?;
    Ok(Outcome::ok(json!({})))
}

async fn restart_all_connectors(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let categories = categories_for(req)?;

    // Stop-all, then start-all: each phase awaits and reports like the
    // standalone commands do.
    let stops = {
        let state = inner.state.lock().await;
        let mut pending = Vec::new();
        for category in categories.iter().copied() {
            for (id, record) in state.records(category) {
                pending.push((category, id.clone(), record.pipeline.submit(StepKind::Stop, req.request_id())));
            }
        }
        pending
    };
    await_steps(stops, |err| matches!(err, LifecycleError::NotActive)).await?;

    let inits = {
        let mut state = inner.state.lock().await;
        let mut pending = Vec::new();
        for category in categories.iter().copied() {
            let ids: Vec<String> = state.config.section(category).keys().cloned().collect();
            for id in ids {
                ControllerInner::ensure_record(inner, &mut state, category, &id);
                let record = state.record(category, &id).expect("record just ensured");
                pending.push((category, id.clone(), record.pipeline.submit(StepKind::Init, req.request_id())));
            }
        }
        pending
    };
    await_steps(inits, |err| matches!(err, LifecycleError::AlreadyActive)).await?;

    Ok(Outcome::ok(json!({})))
}

async fn list_connectors(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let categories = categories_for(req)?;
    let state = inner.state.lock().await;
    let mut report = Vec::new();
    for category in categories {
        let mut ids: Vec<&String> = state.records(category).keys().collect();
        ids.sort();
        for id in ids {
            let record = &state.records(category)[id];
            let ready = record.instance.is_some() && !record.action_pending;
            report.push(json!({
                "id": id,
                "category": category.as_str(),
                "state": if ready { "READY" } else { "WAITING" },
            }));
        }
    }
    Ok(Outcome::ok(Value::Array(report)))
}

async fn get_connector_config(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let category = req.category()?;
    let state = inner.state.lock().await;
    match req.arg("id").and_then(Value::as_str) {
        Some(id) => {
            let entry = state.config.entry(category, id).ok_or_else(|| {
                CommandError::NoSuchConfig { category: category.as_str(), id: id.to_string() }
            })?;
            Ok(Outcome::ok(sanitize_entry(entry)))
        }
        None => {
            let section: Map<String, Value> = state
                .config
                .section(category)
                .iter()
                .map(|(id, entry)| (id.clone(), sanitize_entry(entry)))
                .collect();
            Ok(Outcome::ok(Value::Object(section)))
        }
    }
}

async fn send_data(inner: &Arc<ControllerInner>, req: &CncRequest) -> Result<Outcome, CommandError> {
    let category = req.category()?;
    let id = req.str_arg("id")?;
    let data = req.arg("data").cloned().ok_or(CommandError::MissingArg("data"))?;
    let instance = {
        let state = inner.state.lock().await;
        let record = state.record(category, id).ok_or_else(|| CommandError::NoSuchRecord {
            category: category.as_str(),
            id: id.to_string(),
        })?;
        record.instance.clone().ok_or(CommandError::Lifecycle(LifecycleError::NotActive))?
    };
    instance.add_data(data, req.request_id())?;
    Ok(Outcome::ok(json!({})))
}

async fn update_config(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let category = req.category()?;
    let id = req.str_arg("id")?;
    let config = req.arg("config").cloned().ok_or(CommandError::MissingArg("config"))?;
    let mut state = inner.state.lock().await;
    state.config.section_mut(category).insert(id.to_string(), config);
    Ok(Outcome::mutated(json!({})))
}

async fn delete_config(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let category = req.category()?;
    let id = req.str_arg("id")?;
    let mut state = inner.state.lock().await;
    let removed = state.config.section_mut(category).remove(id).is_some();
    // Deleting a nonexistent entry is a no-op, not an error, and dirties
    // nothing.
    Ok(Outcome { response: json!({}), config_mutated: removed })
}

async fn update_connector_type(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let type_name = req.str_arg("type")?;
    if type_name.is_empty() {
        return Err(CommandError::MissingArg("type"));
    }
    let module = req.str_arg("modulePath")?;
    if module.is_empty() {
        return Err(CommandError::MissingArg("modulePath"));
    }
    let mut state = inner.state.lock().await;
    state.config.connector_types.insert(type_name.to_string(), module.to_string());
    // Re-initialize the registry from the updated map; subsequent
    // constructions observe the new binding.
    let types = inner.build_type_map(&state.config.connector_types);
    inner.factory.initialize(types, Some(Arc::clone(&inner.logger_provider)));
    Ok(Outcome::mutated(json!({})))
}

async fn maintenance_action(
    inner: &Arc<ControllerInner>,
    req: &CncRequest,
) -> Result<Outcome, CommandError> {
    let command = req.arg("command").cloned().unwrap_or(Value::Null);
    inner.shutdown.store(true, Ordering::SeqCst);

    let pending = {
        let state = inner.state.lock().await;
        let mut pending = Vec::new();
        for category in [Category::Cloud, Category::Device] {
            for (id, record) in state.records(category) {
                pending.push((category, id.clone(), record.pipeline.submit(StepKind::Stop, req.request_id())));
            }
        }
        pending
    };
    if let Err(err) = await_steps(pending, |err| matches!(err, LifecycleError::NotActive)).await {
        // Maintenance proceeds regardless; the embedder is about to take
        // over the process anyway.
        req.log(LogLevel::Warn, &format!("maintenance stop incomplete: {err}"));
    }

    let _ = inner.maintenance.send(MaintenanceSignal {
        command,
        request_id: req.request_id().to_string(),
    });
    Ok(Outcome::ok(json!({})))
}
