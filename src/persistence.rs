//! Write-behind queue for optimistic mutations.
//!
//! Stores apply a change locally first and then hand the remote write to
//! [`WriteQueue`]. A single worker drains the queue, so writes reach the
//! backend in the order they were scheduled. A failed write is logged and
//! dropped: local state stays as it is and nothing is retried.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::gateway::{Document, DocumentGateway, WriteOp};

enum Command {
    Write(WriteOp),
    Batch { label: String, ops: Vec<WriteOp> },
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<Command>,
}

impl WriteQueue {
    /// Starts the worker. It stops once every `WriteQueue` clone is dropped.
    pub fn spawn(gateway: Arc<dyn DocumentGateway>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(gateway, rx));
        (Self { tx }, worker)
    }

    /// Schedules an upsert of `value` at `collection/id`.
    pub fn set<T: Serialize>(&self, collection: &str, id: &str, value: &T) {
        match Document::encode(id, value) {
            Ok(doc) => self.send(Command::Write(WriteOp::Set {
                collection: collection.to_string(),
                id: doc.id,
                fields: doc.fields,
            })),
            Err(e) => warn!(collection, id, error = %e, "could not encode document; write skipped"),
        }
    }

    pub fn delete(&self, collection: &str, id: &str) {
        self.send(Command::Write(WriteOp::delete(collection, id)));
    }

    /// Schedules an all-or-nothing batch.
    pub fn batch(&self, label: impl Into<String>, ops: Vec<WriteOp>) {
        if ops.is_empty() {
            return;
        }
        self.send(Command::Batch { label: label.into(), ops });
    }

    /// Waits until every write scheduled before this call has been attempted.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.send(Command::Flush(done));
        let _ = wait.await;
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("write queue stopped; remote write dropped");
        }
    }
}

async fn run(gateway: Arc<dyn DocumentGateway>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Write(WriteOp::Set { collection, id, fields }) => {
                match gateway.set_document(&collection, &id, fields).await {
                    Ok(()) => debug!(%collection, %id, "document saved"),
                    Err(e) => warn!(%collection, %id, error = %e, "remote write failed; keeping local state"),
                }
            }
            Command::Write(WriteOp::Delete { collection, id }) => {
                match gateway.delete_document(&collection, &id).await {
                    Ok(()) => debug!(%collection, %id, "document deleted"),
                    Err(e) => warn!(%collection, %id, error = %e, "remote delete failed; keeping local state"),
                }
            }
            Command::Batch { label, ops } => {
                let count = ops.len();
                match gateway.batch_write(ops).await {
                    Ok(()) => debug!(%label, count, "batch committed"),
                    Err(e) => warn!(%label, count, error = %e, "batch write failed; keeping local state"),
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("write queue drained");
}
