//! Catalog store: the product list and its admin mutations.
//!
//! The catalog is loaded once at startup. Every mutation updates the local
//! list first and then queues the remote write; the local copy is the truth
//! for the rest of the session even if the backend rejects the write.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::domain::aggregates::product::validate_unique_sizes;
use crate::domain::aggregates::{NewProduct, Product};
use crate::domain::events::{DomainEvent, EventBus, ProductEvent};
use crate::domain::value_objects::Money;
use crate::gateway::{collections, load_collection, DocumentGateway, WriteOp};
use crate::persistence::WriteQueue;
use crate::{new_id, Result, StorefrontError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceScope { Category, Brand }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustMode { Percent, Flat }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustDirection { Increase, Decrease }

/// Admin bulk re-pricing request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkPriceUpdate {
    pub scope: PriceScope,
    pub name: String,
    pub mode: AdjustMode,
    pub direction: AdjustDirection,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
}

impl BulkPriceUpdate {
    fn matches(&self, product: &Product) -> bool {
        match self.scope {
            PriceScope::Category => product.category == self.name,
            PriceScope::Brand => product.brand == self.name,
        }
    }

    /// New price for `product`, kept within `[1, originalPrice]`.
    pub fn apply_to(&self, product: &Product) -> Money {
        let delta = match self.mode {
            AdjustMode::Percent => product.price.percent(self.value),
            AdjustMode::Flat => Money::new(self.value),
        };
        let moved = match self.direction {
            AdjustDirection::Increase => product.price + delta,
            AdjustDirection::Decrease => product.price - delta,
        };
        let floor = Money::from_major(1);
        moved.round_whole().clamp_to(floor, product.original_price.max(floor))
    }
}

pub struct CatalogStore {
    gateway: Arc<dyn DocumentGateway>,
    writes: WriteQueue,
    events: EventBus,
    products: watch::Sender<Vec<Product>>,
    loaded: watch::Sender<bool>,
}

impl CatalogStore {
    pub fn new(gateway: Arc<dyn DocumentGateway>, writes: WriteQueue, events: EventBus) -> Self {
        let (products, _) = watch::channel(Vec::new());
        let (loaded, _) = watch::channel(false);
        Self { gateway, writes, events, products, loaded }
    }

    /// Loads the catalog. A failed load leaves the list empty and is logged.
    #[instrument(skip(self))]
    pub async fn load(&self) {
        match load_collection::<Product>(self.gateway.as_ref(), collections::PRODUCTS).await {
            Ok(mut products) => {
                products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                info!(count = products.len(), "catalog loaded");
                self.products.send_replace(products);
                self.loaded.send_replace(true);
            }
            Err(e) => warn!(error = %e, "catalog load failed"),
        }
    }

    /// Reactive view of the product list.
    pub fn products(&self) -> watch::Receiver<Vec<Product>> { self.products.subscribe() }

    pub fn is_loaded(&self) -> bool { *self.loaded.borrow() }

    pub fn get_all(&self) -> Vec<Product> { self.products.borrow().clone() }

    pub fn get_by_category(&self, category: Option<&str>) -> Vec<Product> {
        let products = self.products.borrow();
        match category {
            Some(c) => products.iter().filter(|p| p.category == c).cloned().collect(),
            None => products.clone(),
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<Product> {
        self.products.borrow().iter().find(|p| p.id == id).cloned()
    }

    #[instrument(skip(self, form), fields(name = %form.name))]
    pub fn add(&self, form: NewProduct) -> Result<Product> {
        form.validate()?;
        let product = form.into_product(new_id());
        self.products.send_modify(|list| list.insert(0, product.clone()));
        self.writes.set(collections::PRODUCTS, &product.id, &product);
        self.events.publish(DomainEvent::Product(ProductEvent::Added { product_id: product.id.clone() }));
        info!(product_id = %product.id, "product added");
        Ok(product)
    }

    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub fn update(&self, mut product: Product) -> Result<Product> {
        validate_unique_sizes(&product.sizes).map_err(|e| StorefrontError::invalid_field("sizes", e))?;
        product.reprice(product.price);
        let replaced = self.products.send_if_modified(|list| match list.iter_mut().find(|p| p.id == product.id) {
            Some(slot) => {
                *slot = product.clone();
                true
            }
            None => false,
        });
        if !replaced {
            return Err(StorefrontError::ProductNotFound(product.id));
        }
        self.writes.set(collections::PRODUCTS, &product.id, &product);
        self.events.publish(DomainEvent::Product(ProductEvent::Updated { product_id: product.id.clone() }));
        Ok(product)
    }

    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<()> {
        let removed = self.products.send_if_modified(|list| {
            let before = list.len();
            list.retain(|p| p.id != id);
            list.len() != before
        });
        if !removed {
            return Err(StorefrontError::ProductNotFound(id.to_string()));
        }
        self.writes.delete(collections::PRODUCTS, id);
        self.events.publish(DomainEvent::Product(ProductEvent::Deleted { product_id: id.to_string() }));
        Ok(())
    }

    /// Re-prices every product in the scope. Returns how many prices moved.
    #[instrument(skip(self), fields(scope = ?update.scope, name = %update.name))]
    pub fn bulk_update_prices(&self, update: &BulkPriceUpdate) -> usize {
        let changed: Vec<Product> = self
            .products
            .borrow()
            .iter()
            .filter(|p| update.matches(p))
            .filter_map(|p| {
                let price = update.apply_to(p);
                (price != p.price).then(|| {
                    let mut next = p.clone();
                    next.reprice(price);
                    next
                })
            })
            .collect();
        if changed.is_empty() {
            return 0;
        }

        self.replace_all(&changed);
        self.queue_batch("bulk price update", &changed);
        self.events.publish(DomainEvent::Product(ProductEvent::PricesBulkUpdated {
            scope_name: update.name.clone(),
            changed: changed.len(),
        }));
        info!(changed = changed.len(), "prices updated");
        changed.len()
    }

    /// Moves every product in category `from` to `to`. Returns the count.
    #[instrument(skip(self))]
    pub fn rename_category_across_products(&self, from: &str, to: &str) -> usize {
        if from == to {
            return 0;
        }
        let changed: Vec<Product> = self
            .products
            .borrow()
            .iter()
            .filter(|p| p.category == from)
            .map(|p| Product { category: to.to_string(), ..p.clone() })
            .collect();
        if changed.is_empty() {
            return 0;
        }

        self.replace_all(&changed);
        self.queue_batch("category rename", &changed);
        self.events.publish(DomainEvent::Product(ProductEvent::CategoryRenamed {
            from: from.to_string(),
            to: to.to_string(),
            changed: changed.len(),
        }));
        changed.len()
    }

    /// Stores a new average rating after a review lands.
    pub fn apply_review_stats(&self, product_id: &str, rating: f32, reviews: u32) {
        let mut updated = None;
        self.products.send_if_modified(|list| match list.iter_mut().find(|p| p.id == product_id) {
            Some(p) => {
                p.rating = rating;
                p.reviews = reviews;
                updated = Some(p.clone());
                true
            }
            None => false,
        });
        if let Some(product) = updated {
            self.writes.set(collections::PRODUCTS, &product.id, &product);
        }
    }

    /// Swaps in the changed products in one notification.
    fn replace_all(&self, changed: &[Product]) {
        self.products.send_modify(|list| {
            for product in list.iter_mut() {
                if let Some(next) = changed.iter().find(|c| c.id == product.id) {
                    *product = next.clone();
                }
            }
        });
    }

    fn queue_batch(&self, label: &str, changed: &[Product]) {
        let ops: std::result::Result<Vec<WriteOp>, _> = changed
            .iter()
            .map(|p| WriteOp::set(collections::PRODUCTS, &p.id, p))
            .collect();
        match ops {
            Ok(ops) => self.writes.batch(label, ops),
            Err(e) => warn!(label, error = %e, "could not encode batch; write skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::SizeOption;
    use crate::gateway::MemoryGateway;
    use rust_decimal_macros::dec;

    fn form(name: &str, category: &str, brand: &str, price: i64, mrp: i64) -> NewProduct {
        NewProduct {
            name: name.into(),
            brand: brand.into(),
            price: Money::from_major(price),
            original_price: Money::from_major(mrp),
            images: vec![],
            sizes: vec![SizeOption { name: "M".into(), in_stock: true }],
            details: vec![],
            fit: None,
            fabric: None,
            category: category.into(),
            cod_available: true,
            allow_photo_customization: false,
            b2b_price: None,
            flash_sale: None,
        }
    }

    fn store(gw: &MemoryGateway) -> CatalogStore {
        let gateway: Arc<dyn DocumentGateway> = Arc::new(gw.clone());
        let (writes, _) = WriteQueue::spawn(Arc::clone(&gateway));
        CatalogStore::new(gateway, writes, EventBus::default())
    }

    fn assert_discount_invariant(products: &[Product]) {
        for p in products {
            assert_eq!(p.discount, p.price.discount_from(p.original_price), "{}", p.name);
        }
    }

    #[tokio::test]
    async fn test_add_prepends_and_persists() {
        let gw = MemoryGateway::new();
        let catalog = store(&gw);
        catalog.add(form("A", "Shirts", "Acme", 500, 800)).unwrap();
        let b = catalog.add(form("B", "Shirts", "Acme", 700, 800)).unwrap();
        assert_eq!(catalog.get_all()[0].id, b.id);
        catalog.writes.flush().await;
        assert_eq!(gw.get_collection(collections::PRODUCTS).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_local_copy() {
        let gw = MemoryGateway::new();
        gw.fail_writes(true);
        let catalog = store(&gw);
        let p = catalog.add(form("A", "Shirts", "Acme", 500, 800)).unwrap();
        catalog.writes.flush().await;
        assert!(catalog.get_by_id(&p.id).is_some());
        assert!(gw.get_collection(collections::PRODUCTS).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_and_lookup() {
        let gw = MemoryGateway::new();
        let seed = form("A", "Shirts", "Acme", 500, 800).into_product("P1".into());
        gw.insert(collections::PRODUCTS, "P1", &seed).await.unwrap();
        let catalog = store(&gw);
        assert!(catalog.get_all().is_empty());
        catalog.load().await;
        assert!(catalog.is_loaded());
        assert_eq!(catalog.get_by_category(Some("Shirts")).len(), 1);
        assert!(catalog.get_by_category(Some("Shoes")).is_empty());
        assert_eq!(catalog.get_by_category(None).len(), 1);
        assert!(catalog.get_by_id("nope").is_none());
    }

    #[tokio::test]
    async fn test_update_recomputes_discount() {
        let gw = MemoryGateway::new();
        let catalog = store(&gw);
        let mut p = catalog.add(form("A", "Shirts", "Acme", 500, 1000)).unwrap();
        p.price = Money::from_major(250);
        let saved = catalog.update(p).unwrap();
        assert_eq!(saved.discount, 75);
        assert_discount_invariant(&catalog.get_all());
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let gw = MemoryGateway::new();
        let catalog = store(&gw);
        assert!(matches!(catalog.delete("ghost"), Err(StorefrontError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn test_bulk_update_clamps_and_is_idempotent_at_bound() {
        let gw = MemoryGateway::new();
        let catalog = store(&gw);
        catalog.add(form("A", "Shirts", "Acme", 900, 1000)).unwrap();
        catalog.add(form("B", "Shirts", "Acme", 950, 1000)).unwrap();
        catalog.add(form("C", "Shoes", "Acme", 500, 1000)).unwrap();

        let raise = BulkPriceUpdate {
            scope: PriceScope::Category,
            name: "Shirts".into(),
            mode: AdjustMode::Percent,
            direction: AdjustDirection::Increase,
            value: dec!(20),
        };
        assert_eq!(catalog.bulk_update_prices(&raise), 2);
        assert!(catalog.get_by_category(Some("Shirts")).iter().all(|p| p.price == Money::from_major(1000)));
        assert_eq!(catalog.bulk_update_prices(&raise), 0);
        assert_eq!(catalog.get_by_category(Some("Shoes"))[0].price, Money::from_major(500));
        assert_discount_invariant(&catalog.get_all());
    }

    #[tokio::test]
    async fn test_bulk_flat_decrease_floors_at_one() {
        let gw = MemoryGateway::new();
        let catalog = store(&gw);
        catalog.add(form("A", "Shirts", "Acme", 300, 1000)).unwrap();
        catalog.add(form("B", "Shirts", "Zed", 300, 1000)).unwrap();
        let cut = BulkPriceUpdate {
            scope: PriceScope::Brand,
            name: "Acme".into(),
            mode: AdjustMode::Flat,
            direction: AdjustDirection::Decrease,
            value: dec!(1000),
        };
        assert_eq!(catalog.bulk_update_prices(&cut), 1);
        let acme: Vec<_> = catalog.get_all().into_iter().filter(|p| p.brand == "Acme").collect();
        assert_eq!(acme[0].price, Money::from_major(1));
        assert_eq!(acme[0].discount, 100);
        assert_eq!(catalog.bulk_update_prices(&cut), 0);
        catalog.writes.flush().await;
        let stored = gw.get_collection(collections::PRODUCTS).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_rename_category() {
        let gw = MemoryGateway::new();
        let catalog = store(&gw);
        catalog.add(form("A", "Tees", "Acme", 300, 400)).unwrap();
        catalog.add(form("B", "Tees", "Acme", 300, 400)).unwrap();
        catalog.add(form("C", "Jeans", "Acme", 300, 400)).unwrap();
        assert_eq!(catalog.rename_category_across_products("Tees", "T-Shirts"), 2);
        assert_eq!(catalog.get_by_category(Some("T-Shirts")).len(), 2);
        assert!(catalog.get_by_category(Some("Tees")).is_empty());
    }
}
