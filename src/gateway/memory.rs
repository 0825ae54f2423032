//! In-process document store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::{ChangeCallback, Document, DocumentGateway, Fields, GatewayError, Subscription, WriteOp};

type Collections = BTreeMap<String, BTreeMap<String, Fields>>;

/// Document store held in memory. Cloning shares the same data.
///
/// [`MemoryGateway::fail_writes`] makes every write fail, which is how tests
/// exercise the keep-local-state-on-failure path.
#[derive(Clone)]
pub struct MemoryGateway {
    inner: Arc<Inner>,
}

struct Inner {
    collections: RwLock<Collections>,
    changes: broadcast::Sender<String>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl Default for MemoryGateway {
    fn default() -> Self { Self::new() }
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(BTreeMap::new()),
                changes,
                fail_writes: AtomicBool::new(false),
                writes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of write calls that reached the store, successful or not.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Seeds a document directly, bypassing failure injection.
    pub async fn insert<T: serde::Serialize>(&self, collection: &str, id: &str, value: &T) -> Result<(), GatewayError> {
        let doc = Document::encode(id, value)?;
        self.inner
            .collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id, doc.fields);
        self.notify(collection);
        Ok(())
    }

    fn check_writable(&self) -> Result<(), GatewayError> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn notify(&self, collection: &str) {
        let _ = self.inner.changes.send(collection.to_string());
    }

    async fn snapshot(inner: &Inner, name: &str) -> Vec<Document> {
        inner
            .collections
            .read()
            .await
            .get(name)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document { id: id.clone(), fields: fields.clone() })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn apply(collections: &mut Collections, op: WriteOp) {
        match op {
            WriteOp::Set { collection, id, fields } => {
                let stored = collections.entry(collection).or_default().entry(id).or_default();
                stored.extend(fields);
            }
            WriteOp::Delete { collection, id } => {
                if let Some(docs) = collections.get_mut(&collection) {
                    docs.remove(&id);
                }
            }
        }
    }
}

#[async_trait]
impl DocumentGateway for MemoryGateway {
    async fn get_collection(&self, name: &str) -> Result<Vec<Document>, GatewayError> {
        Ok(Self::snapshot(&self.inner, name).await)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Fields>, GatewayError> {
        Ok(self.inner.collections.read().await.get(collection).and_then(|docs| docs.get(id).cloned()))
    }

    async fn set_document(&self, collection: &str, id: &str, fields: Fields) -> Result<(), GatewayError> {
        self.check_writable()?;
        let op = WriteOp::Set { collection: collection.to_string(), id: id.to_string(), fields };
        Self::apply(&mut *self.inner.collections.write().await, op);
        self.notify(collection);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), GatewayError> {
        self.check_writable()?;
        Self::apply(&mut *self.inner.collections.write().await, WriteOp::delete(collection, id));
        self.notify(collection);
        Ok(())
    }

    async fn listen_collection(&self, name: &str, on_change: ChangeCallback) -> Result<Subscription, GatewayError> {
        let mut rx = self.inner.changes.subscribe();
        on_change(Self::snapshot(&self.inner, name).await);

        let inner = Arc::clone(&self.inner);
        let collection = name.to_string();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(changed) if changed == collection => {}
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(%collection, skipped, "listener lagged; resyncing");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                on_change(Self::snapshot(&inner, &collection).await);
            }
        });
        Ok(Subscription::new(name, task))
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), GatewayError> {
        self.check_writable()?;
        let touched: Vec<String> = ops.iter().map(|op| op.target().0.to_string()).collect();
        {
            let mut collections = self.inner.collections.write().await;
            for op in ops {
                Self::apply(&mut collections, op);
            }
        }
        let mut touched = touched;
        touched.sort();
        touched.dedup();
        for collection in touched {
            self.notify(&collection);
        }
        Ok(())
    }
}
