//! Serialized single-writer persistence for the config document.
//!
//! Command handlers mutate the in-memory document and call
//! [`SerialWriter::schedule`] with a snapshot. At most one write is in
//! flight; snapshots scheduled during a write coalesce into exactly one
//! follow-up carrying the latest snapshot. A failed write is logged and does
//! not suppress the follow-up.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use crate::error::ConfigError;

/// Destination for rendered config documents.
#[async_trait]
pub trait ConfigPersister: Send + Sync {
    /// Replace the persisted document with `contents`.
    async fn persist(&self, contents: String) -> Result<(), ConfigError>;
}

/// Persister replacing the contents of one file.
pub struct FileConfigPersister {
    path: PathBuf,
}

impl FileConfigPersister {
    /// Persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigPersister for FileConfigPersister {
    async fn persist(&self, contents: String) -> Result<(), ConfigError> {
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|err| ConfigError::Write(format!("{}: {err}", self.path.display())))
    }
}

/// Render a JSON value with 4-space indentation, the on-disk config format.
pub fn render_pretty(value: &Value) -> String {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser).expect("json value serializes");
    String::from_utf8(buf).expect("json output is utf-8")
}

struct WriterState {
    in_flight: bool,
    pending: Option<Value>,
}

/// Single-flight config writer with coalescing follow-ups.
#[derive(Clone)]
pub struct SerialWriter {
    persister: Arc<dyn ConfigPersister>,
    state: Arc<Mutex<WriterState>>,
}

impl SerialWriter {
    /// Create a writer draining into `persister`.
    pub fn new(persister: Arc<dyn ConfigPersister>) -> Self {
        Self { persister, state: Arc::new(Mutex::new(WriterState { in_flight: false, pending: None })) }
    }

    /// Schedule `snapshot` for persistence.
    ///
    /// Begins a write immediately when idle; otherwise replaces the pending
    /// follow-up snapshot (mutations coalesce, latest wins).
    pub fn schedule(&self, snapshot: Value) {
        {
            let mut state = self.state.lock().expect("writer state lock poisoned");
            if state.in_flight {
                state.pending = Some(snapshot);
                return;
            }
            state.in_flight = true;
        }
        let writer = self.clone();
        tokio::spawn(async move { writer.drain(snapshot).await });
    }

    async fn drain(self, first: Value) {
        let mut snapshot = first;
        loop {
            let contents = render_pretty(&snapshot);
            if let Err(err) = self.persister.persist(contents).await {
                tracing::error!(target: "edgelink::config", "config write failed: {err}");
            }
            let mut state = self.state.lock().expect("writer state lock poisoned");
            match state.pending.take() {
                Some(next) => snapshot = next,
                None => {
                    state.in_flight = false;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Persister that records rendered snapshots and blocks each write until
    /// a permit arrives, so tests control exactly when a write is in flight.
    struct GatedPersister {
        calls: Mutex<Vec<String>>,
        permits: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<(), ConfigError>>>,
    }

    impl GatedPersister {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<(), ConfigError>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let persister = Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                permits: tokio::sync::Mutex::new(rx),
            });
            (persister, tx)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConfigPersister for GatedPersister {
        async fn persist(&self, contents: String) -> Result<(), ConfigError> {
            self.calls.lock().unwrap().push(contents);
            self.permits.lock().await.recv().await.unwrap_or(Ok(()))
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn rendering_uses_four_space_indentation() {
        let rendered = render_pretty(&json!({ "a": { "b": 1 } }));
        assert_eq!(rendered, "{\n    \"a\": {\n        \"b\": 1\n    }\n}");
    }

    #[tokio::test]
    async fn idle_writer_persists_immediately() {
        let (persister, permits) = GatedPersister::new();
        let writer = SerialWriter::new(persister.clone());

        writer.schedule(json!({ "rev": 1 }));
        permits.send(Ok(())).unwrap();
        settle().await;

        let calls = persister.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("\"rev\": 1"));
    }

    #[tokio::test]
    async fn mutations_during_a_write_coalesce_into_one_follow_up() {
        let (persister, permits) = GatedPersister::new();
        let writer = SerialWriter::new(persister.clone());

        writer.schedule(json!({ "rev": 1 }));
        settle().await;
        // Three more mutations while the first write is blocked.
        writer.schedule(json!({ "rev": 2 }));
        writer.schedule(json!({ "rev": 3 }));
        writer.schedule(json!({ "rev": 4 }));

        permits.send(Ok(())).unwrap();
        permits.send(Ok(())).unwrap();
        settle().await;

        let calls = persister.calls();
        assert_eq!(calls.len(), 2, "expected the in-flight write plus one coalesced follow-up");
        assert!(calls[0].contains("\"rev\": 1"));
        assert!(calls[1].contains("\"rev\": 4"), "follow-up must carry the latest snapshot");
    }

    #[tokio::test]
    async fn failed_write_still_runs_the_follow_up() {
        let (persister, permits) = GatedPersister::new();
        let writer = SerialWriter::new(persister.clone());

        writer.schedule(json!({ "rev": 1 }));
        settle().await;
        writer.schedule(json!({ "rev": 2 }));

        permits.send(Err(ConfigError::Write("disk full".into()))).unwrap();
        permits.send(Ok(())).unwrap();
        settle().await;

        assert_eq!(persister.calls().len(), 2);
    }

    #[tokio::test]
    async fn writer_goes_idle_after_draining() {
        let (persister, permits) = GatedPersister::new();
        let writer = SerialWriter::new(persister.clone());

        writer.schedule(json!({ "rev": 1 }));
        permits.send(Ok(())).unwrap();
        settle().await;

        // A later mutation starts a fresh write rather than coalescing.
        writer.schedule(json!({ "rev": 2 }));
        permits.send(Ok(())).unwrap();
        settle().await;

        assert_eq!(persister.calls().len(), 2);
    }

    #[tokio::test]
    async fn file_persister_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        let persister = FileConfigPersister::new(&path);

        persister.persist(render_pretty(&json!({ "rev": 1 }))).await.unwrap();
        persister.persist(render_pretty(&json!({ "rev": 2 }))).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"rev\": 2"));
        assert!(!contents.contains("\"rev\": 1"));
    }
}
