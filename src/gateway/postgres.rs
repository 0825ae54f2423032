//! PostgreSQL-backed document store.
//!
//! Documents live in one JSONB table keyed by (collection, id). A trigger
//! raises `NOTIFY documents_changed, '<collection>'` on every write, which
//! drives collection listeners.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::sync::Arc;

use super::{ChangeCallback, Document, DocumentGateway, Fields, GatewayError, Subscription, WriteOp};

const CHANGE_CHANNEL: &str = "documents_changed";

const UPSERT: &str = "INSERT INTO documents (collection, id, data, updated_at) VALUES ($1, $2, $3, NOW()) \
     ON CONFLICT (collection, id) DO UPDATE SET data = documents.data || EXCLUDED.data, updated_at = NOW()";
const DELETE: &str = "DELETE FROM documents WHERE collection = $1 AND id = $2";

#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    /// Connects and brings the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("document store ready");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self { Self { pool } }

    async fn fetch(pool: &PgPool, name: &str) -> Result<Vec<Document>, GatewayError> {
        let rows = sqlx::query_as::<_, (String, Json<Value>)>(
            "SELECT id, data FROM documents WHERE collection = $1 ORDER BY id",
        )
        .bind(name)
        .fetch_all(pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, Json(data))| match data {
                Value::Object(fields) => Some(Document { id, fields }),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl DocumentGateway for PgGateway {
    async fn get_collection(&self, name: &str) -> Result<Vec<Document>, GatewayError> {
        Self::fetch(&self.pool, name).await
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Fields>, GatewayError> {
        let row = sqlx::query_as::<_, (Json<Value>,)>("SELECT data FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(Json(data),)| match data {
            Value::Object(fields) => Some(fields),
            _ => None,
        }))
    }

    async fn set_document(&self, collection: &str, id: &str, fields: Fields) -> Result<(), GatewayError> {
        sqlx::query(UPSERT)
            .bind(collection)
            .bind(id)
            .bind(Json(Value::Object(fields)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), GatewayError> {
        sqlx::query(DELETE).bind(collection).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn listen_collection(&self, name: &str, on_change: ChangeCallback) -> Result<Subscription, GatewayError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        on_change(Self::fetch(&self.pool, name).await?);

        let pool = self.pool.clone();
        let collection = name.to_string();
        let callback = Arc::clone(&on_change);
        let task = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) if notification.payload() == collection => {
                        match Self::fetch(&pool, &collection).await {
                            Ok(docs) => callback(docs),
                            Err(e) => tracing::warn!(%collection, error = %e, "listener refresh failed"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(%collection, error = %e, "listener connection lost");
                        break;
                    }
                }
            }
        });
        Ok(Subscription::new(name, task))
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await?;
        for op in ops {
            match op {
                WriteOp::Set { collection, id, fields } => {
                    sqlx::query(UPSERT)
                        .bind(collection)
                        .bind(id)
                        .bind(Json(Value::Object(fields)))
                        .execute(&mut *tx)
                        .await?;
                }
                WriteOp::Delete { collection, id } => {
                    sqlx::query(DELETE).bind(collection).bind(id).execute(&mut *tx).await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
