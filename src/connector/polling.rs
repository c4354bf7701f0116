//! Polling connector variant.
//!
//! Wraps a [`PollHandler`] and invokes it on a fixed period once started.
//! The period comes from the connector config's `pollFrequency` option
//! (milliseconds, must be positive). Re-initializing reschedules the timer;
//! stopping cancels it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{Connector, ConnectorBase};
use crate::error::ConnectorError;

/// Periodic work performed by a polling connector.
#[async_trait]
pub trait PollHandler: Send + Sync + 'static {
    /// Perform one poll. `Some` payloads are emitted as data events; errors
    /// are logged at warn and polling continues.
    async fn poll(&self) -> Result<Option<Value>, ConnectorError>;
}

/// A device connector that samples its peer at `pollFrequency` milliseconds.
pub struct PollingConnector<H: PollHandler> {
    base: Arc<ConnectorBase>,
    handler: Arc<H>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<H: PollHandler> PollingConnector<H> {
    /// Create a polling connector around `handler`.
    pub fn new(id: impl Into<String>, handler: H) -> Self {
        Self {
            base: Arc::new(ConnectorBase::new(id)),
            handler: Arc::new(handler),
            timer: Mutex::new(None),
        }
    }

    fn cancel_timer(&self) {
        if let Some(task) = self.timer.lock().expect("poll timer lock poisoned").take() {
            task.abort();
        }
    }
}

impl<H: PollHandler> Drop for PollingConnector<H> {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[async_trait]
impl<H: PollHandler> Connector for PollingConnector<H> {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }

    async fn on_start(&self, config: &Value) -> Result<Value, ConnectorError> {
        let frequency = config
            .get("pollFrequency")
            .and_then(Value::as_f64)
            .filter(|f| *f > 0.0)
            .ok_or_else(|| {
                ConnectorError::InvalidConfig(
                    "pollFrequency must be a positive number of milliseconds".into(),
                )
            })?;
        let period = Duration::from_secs_f64(frequency / 1000.0);

        // A second init reschedules: drop the previous timer before arming
        // the new one.
        self.cancel_timer();

        let base = Arc::clone(&self.base);
        let handler = Arc::clone(&self.handler);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the poll cadence starts
            // one period after init.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match handler.poll().await {
                    Ok(Some(payload)) => base.emit_data(payload),
                    Ok(None) => {}
                    Err(err) => base.logger().warn(&format!("poll failed: {err}")),
                }
            }
        });
        *self.timer.lock().expect("poll timer lock poisoned") = Some(task);

        Ok(serde_json::json!({ "pollFrequency": frequency }))
    }

    async fn on_stop(&self) -> Result<Value, ConnectorError> {
        self.cancel_timer();
        Ok(serde_json::json!({}))
    }
}
