//! OpenSASE Storefront - headless state engine
//!
//! Loads the store, keeps its listeners running and forwards domain events
//! to NATS when `NATS_URL` is set. Stops on Ctrl-C after flushing writes.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_storefront::gateway::{DocumentGateway, MemoryGateway, PgGateway};
use opensase_storefront::identity::LocalIdentityProvider;
use opensase_storefront::storage::MemoryStorage;
use opensase_storefront::{DomainEvent, StoreConfig, Storefront};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StoreConfig::from_env()?;
    let gateway: Arc<dyn DocumentGateway> = match &config.database_url {
        Some(url) => Arc::new(PgGateway::connect(url).await?),
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory document store");
            Arc::new(MemoryGateway::new())
        }
    };
    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable; events stay local");
                None
            }
        },
        None => None,
    };

    let store = Storefront::new(config, gateway, Arc::new(LocalIdentityProvider::new()), Arc::new(MemoryStorage::new()));
    store.load_all().await;
    store.start().await?;

    let forwarder = nats.map(|client| tokio::spawn(forward_events(client, store.events())));

    tracing::info!("🚀 OpenSASE Storefront running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    if let Some(task) = forwarder {
        task.abort();
    }
    store.shutdown().await;
    Ok(())
}

async fn forward_events(client: async_nats::Client, mut events: tokio::sync::broadcast::Receiver<DomainEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let payload = match serde_json::to_vec(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(error = %e, "event not serializable");
                        continue;
                    }
                };
                if let Err(e) = client.publish(event.subject().to_string(), payload.into()).await {
                    tracing::warn!(subject = event.subject(), error = %e, "event publish failed");
                }
            }
            Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "event forwarder lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
