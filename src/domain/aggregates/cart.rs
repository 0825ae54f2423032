//! Cart Aggregate
//!
//! The cart lives only in the session; it is never written to the backend.
//! Lines are keyed by (product id, size, customized?): plain lines merge by
//! bumping the quantity, customized lines always stand alone.

use serde::{Deserialize, Serialize};

use crate::domain::aggregates::Product;
use crate::domain::value_objects::Quantity;

/// Photo customization attached to a cart or order line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    pub photo_url: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product: Product,
    pub size: String,
    pub quantity: Quantity,
    #[serde(default)]
    pub customization: Option<Customization>,
}

impl CartItem {
    fn merges_with(&self, other: &CartItem) -> bool {
        self.customization.is_none()
            && other.customization.is_none()
            && self.product.id == other.product.id
            && self.size == other.size
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn unit_count(&self) -> u32 { self.items.iter().map(|i| i.quantity.value()).sum() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.merges_with(&item)) {
            existing.quantity = existing.quantity.add(item.quantity.value());
        } else {
            self.items.push(item);
        }
    }

    /// Sets the quantity of the line at `index`; zero removes the line.
    pub fn update_quantity(&mut self, index: usize, quantity: u32) -> Result<(), CartError> {
        if index >= self.items.len() { return Err(CartError::ItemNotFound); }
        match Quantity::new(quantity) {
            Some(q) => self.items[index].quantity = q,
            None => { self.items.remove(index); }
        }
        Ok(())
    }

    pub fn remove_item(&mut self, index: usize) -> Result<CartItem, CartError> {
        if index >= self.items.len() { return Err(CartError::ItemNotFound); }
        Ok(self.items.remove(index))
    }

    /// Refreshes product snapshots from the live catalog, dropping lines whose
    /// product no longer exists.
    pub fn refresh_products(&mut self, catalog: &[Product]) {
        self.items.retain_mut(|item| match catalog.iter().find(|p| p.id == item.product.id) {
            Some(p) => { item.product = p.clone(); true }
            None => false,
        });
    }

    pub fn clear(&mut self) { self.items.clear(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("Item not found")]
    ItemNotFound,
}
