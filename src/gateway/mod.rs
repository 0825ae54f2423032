//! Remote document store.
//!
//! The storefront keeps its durable state in a schemaless document database:
//! named collections of JSON documents keyed by id. [`DocumentGateway`] is the
//! narrow contract the stores consume; [`MemoryGateway`] backs tests and
//! offline runs, [`PgGateway`] keeps documents in PostgreSQL.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

mod memory;
mod postgres;

pub use memory::MemoryGateway;
pub use postgres::PgGateway;

pub type Fields = serde_json::Map<String, Value>;

/// Collection names used by the storefront.
pub mod collections {
    pub const PRODUCTS: &str = "products";
    pub const USERS: &str = "users";
    pub const ORDERS: &str = "orders";
    pub const ADDRESSES: &str = "addresses";
    pub const COUPONS: &str = "coupons";
    pub const POPUPS: &str = "popups";
    pub const CATEGORIES: &str = "categories";
    pub const FAQS: &str = "faqs";
    pub const REVIEWS: &str = "reviews";
    pub const TRANSACTIONS: &str = "transactions";
    pub const BANNERS: &str = "banners";
    pub const SETTINGS: &str = "settings";

    /// Documents inside [`SETTINGS`].
    pub const SHIPPING_DOC: &str = "shipping";
    pub const THEME_DOC: &str = "theme";
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn encode<T: Serialize>(id: impl Into<String>, value: &T) -> Result<Self, GatewayError> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Self { id: id.into(), fields }),
            other => Err(GatewayError::Rejected(format!("document must be an object, got {other}"))),
        }
    }

    /// Decodes the document, filling in `id` from the key when the stored
    /// fields omit it.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        let mut fields = self.fields.clone();
        fields.entry("id").or_insert_with(|| Value::String(self.id.clone()));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    Set { collection: String, id: String, fields: Fields },
    Delete { collection: String, id: String },
}

impl WriteOp {
    pub fn set<T: Serialize>(collection: &str, id: &str, value: &T) -> Result<Self, GatewayError> {
        let doc = Document::encode(id, value)?;
        Ok(Self::Set { collection: collection.to_string(), id: doc.id, fields: doc.fields })
    }

    pub fn delete(collection: &str, id: &str) -> Self {
        Self::Delete { collection: collection.to_string(), id: id.to_string() }
    }

    pub fn target(&self) -> (&str, &str) {
        match self {
            Self::Set { collection, id, .. } | Self::Delete { collection, id } => (collection, id),
        }
    }
}

/// Called with the full collection snapshot on every change.
pub type ChangeCallback = Arc<dyn Fn(Vec<Document>) + Send + Sync>;

/// A standing collection listener. Dropping it also unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    collection: String,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(collection: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self { collection: collection.into(), task: Some(task) }
    }

    pub fn collection(&self) -> &str { &self.collection }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::debug!(collection = %self.collection, "unsubscribing listener");
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.stop(); }
}

#[async_trait]
pub trait DocumentGateway: Send + Sync {
    async fn get_collection(&self, name: &str) -> Result<Vec<Document>, GatewayError>;

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Fields>, GatewayError>;

    /// Upsert: fields present in `fields` overwrite stored ones, others stay.
    async fn set_document(&self, collection: &str, id: &str, fields: Fields) -> Result<(), GatewayError>;

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), GatewayError>;

    /// Invokes `on_change` with the current snapshot, then again after every
    /// change to the collection until the subscription is dropped.
    async fn listen_collection(&self, name: &str, on_change: ChangeCallback) -> Result<Subscription, GatewayError>;

    /// Applies every operation or none of them.
    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), GatewayError>;
}

/// Decodes documents into records, skipping (and logging) malformed ones.
pub fn decode_all<T: DeserializeOwned>(collection: &str, docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode() {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(collection, id = %doc.id, error = %e, "skipping malformed document");
                None
            }
        })
        .collect()
}

pub async fn load_collection<T: DeserializeOwned>(
    gateway: &dyn DocumentGateway,
    collection: &str,
) -> Result<Vec<T>, GatewayError> {
    let docs = gateway.get_collection(collection).await?;
    Ok(decode_all(collection, &docs))
}

pub async fn load_document<T: DeserializeOwned>(
    gateway: &dyn DocumentGateway,
    collection: &str,
    id: &str,
) -> Result<Option<T>, GatewayError> {
    match gateway.get_document(collection, id).await? {
        Some(fields) => Ok(Some(Document { id: id.to_string(), fields }.decode()?)),
        None => Ok(None),
    }
}
