//! In-process cloud connector over tokio channels.
//!
//! The reference cloud-connector implementation: inbound command batches
//! arrive on an mpsc receiver and are surfaced as `data` events; outbound
//! payloads (`add_data`) and reply envelopes (`add_log_data`) are forwarded
//! to an mpsc sender. Useful for embedding the gateway in a larger process
//! and for end-to-end tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Connector, ConnectorBase};
use crate::error::ConnectorError;

/// Cloud connector bridging two in-process channels.
pub struct ChannelCloudConnector {
    base: Arc<ConnectorBase>,
    inbound: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>>,
    outbound: mpsc::UnboundedSender<Value>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelCloudConnector {
    /// Create a connector reading commands from `inbound` and writing
    /// outbound payloads and reply envelopes to `outbound`.
    pub fn new(
        id: impl Into<String>,
        inbound: mpsc::UnboundedReceiver<Value>,
        outbound: mpsc::UnboundedSender<Value>,
    ) -> Self {
        Self {
            base: Arc::new(ConnectorBase::new(id)),
            inbound: Arc::new(tokio::sync::Mutex::new(inbound)),
            outbound,
            pump: Mutex::new(None),
        }
    }

    fn cancel_pump(&self) {
        if let Some(task) = self.pump.lock().expect("pump lock poisoned").take() {
            task.abort();
        }
    }
}

impl Drop for ChannelCloudConnector {
    fn drop(&mut self) {
        self.cancel_pump();
    }
}

#[async_trait]
impl Connector for ChannelCloudConnector {
    fn base(&self) -> &ConnectorBase {
        &self.base
    }

    async fn on_start(&self, _config: &Value) -> Result<Value, ConnectorError> {
        self.cancel_pump();
        let base = Arc::clone(&self.base);
        let inbound = Arc::clone(&self.inbound);
        let task = tokio::spawn(async move {
            let mut rx = inbound.lock().await;
            while let Some(payload) = rx.recv().await {
                base.emit_data(payload);
            }
        });
        *self.pump.lock().expect("pump lock poisoned") = Some(task);
        Ok(serde_json::json!({}))
    }

    async fn on_stop(&self) -> Result<Value, ConnectorError> {
        self.cancel_pump();
        Ok(serde_json::json!({}))
    }

    fn add_data(&self, payload: Value, _request_id: &str) -> Result<(), ConnectorError> {
        if !payload.is_object() {
            return Err(ConnectorError::InvalidPayload("payload must be a mapping".into()));
        }
        self.outbound
            .send(payload)
            .map_err(|_| ConnectorError::Failed("outbound channel closed".into()))
    }

    fn add_log_data(&self, payload: Value) {
        // Reply envelopes are best-effort; a closed peer just drops them.
        let _ = self.outbound.send(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorEvent;
    use serde_json::json;

    #[tokio::test]
    async fn inbound_payloads_become_data_events() {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let conn = ChannelCloudConnector::new("cnc", in_rx, out_tx);

        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        conn.attach_events(ev_tx);
        conn.init(&json!({}), "r1").await.unwrap();

        in_tx.send(json!([{ "action": "list_connectors" }])).unwrap();
        match ev_rx.recv().await.unwrap() {
            ConnectorEvent::Data(v) => assert_eq!(v, json!([{ "action": "list_connectors" }])),
            other => panic!("expected data event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn outbound_forwards_data_and_log_payloads() {
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let conn = ChannelCloudConnector::new("cnc", in_rx, out_tx);

        conn.add_data(json!({ "value": 1 }), "r1").unwrap();
        conn.add_log_data(json!({ "requestId": "r1", "qos": 1 }));

        assert_eq!(out_rx.recv().await.unwrap(), json!({ "value": 1 }));
        assert_eq!(out_rx.recv().await.unwrap(), json!({ "requestId": "r1", "qos": 1 }));

        let err = conn.add_data(json!("scalar"), "r1").unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn stop_halts_the_inbound_pump() {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let conn = ChannelCloudConnector::new("cnc", in_rx, out_tx);

        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        conn.attach_events(ev_tx);
        conn.init(&json!({}), "r1").await.unwrap();
        conn.stop("r2").await.unwrap();

        in_tx.send(json!([{ "action": "noop" }])).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(ev_rx.try_recv().is_err());
    }
}
