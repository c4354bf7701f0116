//! Per-connector records and the serial lifecycle pipeline.
//!
//! Every connector slot owns a mailbox consumed by one worker task, so
//! lifecycle steps on a slot execute strictly in enqueue order while steps on
//! different slots proceed independently. A failed step does not poison the
//! mailbox; the worker simply takes the next step. Guards are evaluated when
//! a step begins executing, not when it was enqueued.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::router::route_events;
use super::{ControllerInner, GatewayState};
use crate::config::parse_entry;
use crate::connector::{Category, Connector};
use crate::error::{ConnectorError, LifecycleError};

/// A lifecycle step kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StepKind {
    /// Construct and initialize an instance.
    Init,
    /// Stop and vacate the instance.
    Stop,
}

struct SlotStep {
    kind: StepKind,
    request_id: String,
    reply: oneshot::Sender<Result<Value, LifecycleError>>,
}

/// Handle to one slot's serial pipeline.
#[derive(Clone)]
pub(crate) struct SlotPipeline {
    tx: mpsc::UnboundedSender<SlotStep>,
}

impl SlotPipeline {
    /// Spawn the worker for `(category, id)` and return its handle.
    pub(crate) fn spawn(inner: Weak<ControllerInner>, category: Category, id: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SlotStep>();
        tokio::spawn(async move {
            while let Some(step) = rx.recv().await {
                let Some(inner) = inner.upgrade() else { return };
                let result = match step.kind {
                    StepKind::Init => run_init(&inner, category, &id, &step.request_id).await,
                    StepKind::Stop => run_stop(&inner, category, &id, &step.request_id).await,
                };
                // Nobody awaiting the outcome is fine.
                let _ = step.reply.send(result);
            }
        });
        Self { tx }
    }

    /// Enqueue a step; the receiver resolves when the step settles.
    pub(crate) fn submit(
        &self,
        kind: StepKind,
        request_id: &str,
    ) -> oneshot::Receiver<Result<Value, LifecycleError>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(SlotStep { kind, request_id: request_id.to_string(), reply });
        rx
    }
}

/// Controller-held state for one connector slot.
pub(crate) struct ConnectorRecord {
    /// Serial sequencer for this slot.
    pub(crate) pipeline: SlotPipeline,
    /// Present only between a successful init and the next stop.
    pub(crate) instance: Option<Arc<dyn Connector>>,
    /// True while an init/stop is in flight.
    pub(crate) action_pending: bool,
    /// Payload of the last settled step, or its error.
    pub(crate) last_result: Option<Result<Value, String>>,
    /// Event-routing task for the current instance.
    pub(crate) router_task: Option<JoinHandle<()>>,
}

impl ConnectorRecord {
    pub(crate) fn new(pipeline: SlotPipeline) -> Self {
        Self { pipeline, instance: None, action_pending: false, last_result: None, router_task: None }
    }
}

fn settle_failure(
    state: &mut GatewayState,
    category: Category,
    id: &str,
    err: LifecycleError,
) -> Result<Value, LifecycleError> {
    if let Some(record) = state.record_mut(category, id) {
        record.action_pending = false;
        record.last_result = Some(Err(err.to_string()));
    }
    Err(err)
}

async fn run_init(
    inner: &Arc<ControllerInner>,
    category: Category,
    id: &str,
    request_id: &str,
) -> Result<Value, LifecycleError> {
    let (instance, config) = {
        let mut state = inner.state.lock().await;
        if state.record(category, id).and_then(|r| r.instance.as_ref()).is_some() {
            return settle_failure(&mut state, category, id, LifecycleError::AlreadyActive);
        }
        if inner.shutdown.load(Ordering::SeqCst) {
            return settle_failure(&mut state, category, id, LifecycleError::ShuttingDown);
        }
        let entry = match state.config.entry(category, id) {
            Some(entry) => entry.clone(),
            None => return settle_failure(&mut state, category, id, LifecycleError::ConfigMissing),
        };
        let (type_name, config) = match parse_entry(id, &entry) {
            Ok(parsed) => parsed,
            Err(err) => {
                let err = ConnectorError::InvalidConfig(err.to_string());
                return settle_failure(&mut state, category, id, err.into());
            }
        };
        let instance = match inner.factory.create_connector(&type_name, id) {
            Ok(instance) => instance,
            Err(err) => return settle_failure(&mut state, category, id, err.into()),
        };
        let record = state.record_mut(category, id).expect("record exists while pipeline runs");
        record.action_pending = true;
        (instance, config)
    };

    // The lock is not held across the connector's own startup.
    let init_result = instance.init(&config, request_id).await;

    let mut state = inner.state.lock().await;
    let record = state.record_mut(category, id).expect("record exists while pipeline runs");
    record.action_pending = false;
    match init_result {
        Ok(payload) => {
            // Fresh instance, fresh channel: handlers are wired exactly once.
            let (tx, rx) = mpsc::unbounded_channel();
            instance.attach_events(tx);
            let task =
                tokio::spawn(route_events(Arc::downgrade(inner), category, id.to_string(), rx));
            record.instance = Some(Arc::clone(&instance));
            record.router_task = Some(task);
            record.last_result = Some(Ok(payload.clone()));
            Ok(payload)
        }
        Err(err) => {
            record.last_result = Some(Err(err.to_string()));
            Err(err.into())
        }
    }
}

async fn run_stop(
    inner: &Arc<ControllerInner>,
    category: Category,
    id: &str,
    request_id: &str,
) -> Result<Value, LifecycleError> {
    let instance = {
        let mut state = inner.state.lock().await;
        match state.record(category, id).and_then(|r| r.instance.clone()) {
            Some(instance) => {
                let record =
                    state.record_mut(category, id).expect("record exists while pipeline runs");
                record.action_pending = true;
                instance
            }
            None => return settle_failure(&mut state, category, id, LifecycleError::NotActive),
        }
    };

    let stop_result = instance.stop(request_id).await;

    let mut state = inner.state.lock().await;
    let record = state.record_mut(category, id).expect("record exists while pipeline runs");
    // Success or failure, the slot is vacated and handlers detached. The
    // router task drains its channel and exits once the sender is gone.
    instance.detach_events();
    record.router_task.take();
    record.instance = None;
    record.action_pending = false;
    match stop_result {
        Ok(payload) => {
            record.last_result = Some(Ok(payload.clone()));
            Ok(payload)
        }
        Err(err) => {
            record.last_result = Some(Err(err.to_string()));
            Err(err.into())
        }
    }
}
