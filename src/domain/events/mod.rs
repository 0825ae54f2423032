//! Domain events
use crate::domain::aggregates::{OrderStatus, ReturnStatus};
use crate::domain::value_objects::Money;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
    Wallet(WalletEvent),
    User(UserEvent),
}

impl DomainEvent {
    /// NATS subject the event is forwarded on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Product(_) => "storefront.product",
            Self::Order(_) => "storefront.order",
            Self::Wallet(_) => "storefront.wallet",
            Self::User(_) => "storefront.user",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductEvent {
    Added { product_id: String },
    Updated { product_id: String },
    Deleted { product_id: String },
    PricesBulkUpdated { scope_name: String, changed: usize },
    CategoryRenamed { from: String, to: String, changed: usize },
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: String, user_id: String, total: Money },
    StatusChanged { order_id: String, status: OrderStatus },
    Cancelled { order_id: String },
    ReturnRequested { order_id: String, line: usize },
    ReturnDecided { order_id: String, line: usize, status: ReturnStatus },
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletEvent {
    Credited { user_id: String, amount: Money, transaction_id: String },
    Debited { user_id: String, amount: Money, transaction_id: String },
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserEvent {
    Created { user_id: String },
    Blacklisted { user_id: String, blacklisted: bool },
}

/// Fan-out of domain events. Publishing never fails: with no subscribers the
/// event is dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: DomainEvent) {
        tracing::debug!(subject = event.subject(), ?event, "domain event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> { self.tx.subscribe() }
}

impl Default for EventBus {
    fn default() -> Self { Self::new(256) }
}
