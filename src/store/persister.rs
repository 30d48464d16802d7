//! Fire-and-forget write-behind to a [`KeyValueStore`].
//!
//! Callers enqueue snapshot writes synchronously; a single background task
//! applies them in submission order. Failures are logged and dropped: the
//! in-memory state of the caller stays authoritative.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::KeyValueStore;

enum PersistOp {
    Set { key: String, value: String },
    Remove { key: String },
    RemovePrefix { prefix: String },
    Flush(oneshot::Sender<()>),
}

/// Background writer shared by one service.
pub struct Persister {
    label: &'static str,
    tx: Mutex<Option<mpsc::UnboundedSender<PersistOp>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Persister {
    /// Spawn the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn KeyValueStore>, label: &'static str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(store, rx, label));
        Self {
            label,
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: String) {
        self.send(PersistOp::Set {
            key: key.into(),
            value,
        });
    }

    pub fn remove(&self, key: impl Into<String>) {
        self.send(PersistOp::Remove { key: key.into() });
    }

    /// Remove every stored key starting with `prefix`, including keys that
    /// were never loaded into memory.
    pub fn remove_prefix(&self, prefix: impl Into<String>) {
        self.send(PersistOp::RemovePrefix {
            prefix: prefix.into(),
        });
    }

    /// Wait until every write enqueued so far has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.send(PersistOp::Flush(done_tx)) {
            let _ = done_rx.await;
        }
    }

    /// Drain pending writes and stop the writer. Later writes are dropped.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(tx);
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(store = self.label, "Persistence writer ended abnormally: {}", e);
            }
        }
    }

    fn send(&self, op: PersistOp) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) if tx.send(op).is_ok() => true,
            _ => {
                debug!(store = self.label, "Persister closed, dropping write");
                false
            }
        }
    }
}

async fn run_writer(
    store: Arc<dyn KeyValueStore>,
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
    label: &'static str,
) {
    while let Some(op) = rx.recv().await {
        match op {
            PersistOp::Set { key, value } => {
                if let Err(e) = store.set(&key, value).await {
                    warn!(store = label, key = %key, "Failed to persist: {}", e);
                }
            }
            PersistOp::Remove { key } => {
                if let Err(e) = store.remove(&key).await {
                    warn!(store = label, key = %key, "Failed to remove persisted copy: {}", e);
                }
            }
            PersistOp::RemovePrefix { prefix } => {
                let keys = match store.get_all_keys().await {
                    Ok(keys) => keys,
                    Err(e) => {
                        warn!(store = label, "Failed to list persisted keys: {}", e);
                        continue;
                    }
                };
                for key in keys.iter().filter(|k| k.starts_with(&prefix)) {
                    if let Err(e) = store.remove(key).await {
                        warn!(store = label, key = %key, "Failed to remove persisted copy: {}", e);
                    }
                }
            }
            PersistOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(store = label, "Persistence writer stopped");
}
