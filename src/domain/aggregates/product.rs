//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::{Validate, ValidationError};

use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub price: Money,
    pub original_price: Money,
    /// Percent saved against `original_price`. Kept in step by [`Product::reprice`].
    pub discount: i32,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub reviews: u32,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub sizes: Vec<SizeOption>,
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub fit: Option<String>,
    #[serde(default)]
    pub fabric: Option<String>,
    pub category: String,
    #[serde(default = "default_true")]
    pub cod_available: bool,
    #[serde(default)]
    pub allow_photo_customization: bool,
    #[serde(default)]
    pub b2b_price: Option<Money>,
    #[serde(default)]
    pub flash_sale: Option<FlashSale>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool { true }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeOption {
    pub name: String,
    pub in_stock: bool,
}

/// Time-boxed price override, live while `now < ends_at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashSale {
    pub price: Money,
    pub ends_at: DateTime<Utc>,
}

impl FlashSale {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool { now < self.ends_at }
}

impl Product {
    /// Sets a new price and recomputes the discount percentage.
    pub fn reprice(&mut self, price: Money) {
        self.price = price;
        self.discount = price.discount_from(self.original_price);
    }

    pub fn size(&self, name: &str) -> Option<&SizeOption> {
        self.sizes.iter().find(|s| s.name == name)
    }

    pub fn is_in_stock(&self) -> bool { self.sizes.is_empty() || self.sizes.iter().any(|s| s.in_stock) }

    pub fn active_flash_price(&self, now: DateTime<Utc>) -> Option<Money> {
        self.flash_sale.as_ref().filter(|f| f.is_active(now)).map(|f| f.price)
    }
}

/// A product as submitted from the admin form, before it has an id.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_pricing"))]
pub struct NewProduct {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub brand: String,
    pub price: Money,
    pub original_price: Money,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    #[validate(custom = "validate_unique_sizes")]
    pub sizes: Vec<SizeOption>,
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub fit: Option<String>,
    #[serde(default)]
    pub fabric: Option<String>,
    #[validate(length(min = 1))]
    pub category: String,
    #[serde(default = "default_true")]
    pub cod_available: bool,
    #[serde(default)]
    pub allow_photo_customization: bool,
    #[serde(default)]
    pub b2b_price: Option<Money>,
    #[serde(default)]
    pub flash_sale: Option<FlashSale>,
}

impl NewProduct {
    pub fn into_product(self, id: String) -> Product {
        let mut product = Product {
            id,
            name: self.name,
            brand: self.brand,
            price: self.price,
            original_price: self.original_price,
            discount: 0,
            rating: 0.0,
            reviews: 0,
            images: self.images,
            sizes: self.sizes,
            details: self.details,
            fit: self.fit,
            fabric: self.fabric,
            category: self.category,
            cod_available: self.cod_available,
            allow_photo_customization: self.allow_photo_customization,
            b2b_price: self.b2b_price,
            flash_sale: self.flash_sale,
            created_at: Utc::now(),
        };
        product.reprice(self.price);
        product
    }
}

fn validate_pricing(p: &NewProduct) -> Result<(), ValidationError> {
    if p.price < Money::from_major(1) {
        return Err(ValidationError::new("price_below_minimum"));
    }
    if p.original_price < p.price {
        return Err(ValidationError::new("original_price_below_price"));
    }
    Ok(())
}

pub(crate) fn validate_unique_sizes(sizes: &[SizeOption]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    if sizes.iter().all(|s| seen.insert(s.name.as_str())) {
        Ok(())
    } else {
        Err(ValidationError::new("duplicate_size"))
    }
}
