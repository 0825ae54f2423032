//! Catalog browsing: category, search, filters, sort, recently viewed and
//! the comparison list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::instrument;

use super::{Storefront, View};
use crate::domain::aggregates::Product;
use crate::domain::value_objects::Money;
use crate::pricing::resolve_unit_price;
use crate::storage::{keys, write_json, Scope};
use crate::{Result, StorefrontError};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(default)]
    pub brands: BTreeSet<String>,
    #[serde(default)]
    pub sizes: BTreeSet<String>,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
    pub min_rating: Option<f32>,
    #[serde(default)]
    pub in_stock_only: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOption {
    #[default]
    Relevance,
    PriceLowToHigh,
    PriceHighToLow,
    Newest,
    Rating,
    Discount,
}

/// Everything that narrows the product grid.
pub(crate) struct BrowseQuery<'a> {
    pub category: Option<&'a str>,
    pub search: &'a str,
    pub filters: &'a Filters,
    pub sort: SortOption,
    pub is_b2b: bool,
    pub now: DateTime<Utc>,
}

impl BrowseQuery<'_> {
    fn matches(&self, product: &Product) -> bool {
        if self.category.is_some_and(|c| product.category != c) {
            return false;
        }
        let needle = self.search.trim().to_lowercase();
        if !needle.is_empty() {
            let haystack = [&product.name, &product.brand, &product.category];
            if !haystack.iter().any(|field| field.to_lowercase().contains(&needle)) {
                return false;
            }
        }
        let f = self.filters;
        if !f.brands.is_empty() && !f.brands.contains(&product.brand) {
            return false;
        }
        if !f.sizes.is_empty() && !product.sizes.iter().any(|s| s.in_stock && f.sizes.contains(&s.name)) {
            return false;
        }
        let price = resolve_unit_price(product, self.is_b2b, self.now);
        if f.min_price.is_some_and(|min| price < min) || f.max_price.is_some_and(|max| price > max) {
            return false;
        }
        if f.min_rating.is_some_and(|min| product.rating < min) {
            return false;
        }
        !f.in_stock_only || product.is_in_stock()
    }

    pub fn apply(&self, products: &[Product]) -> Vec<Product> {
        let mut visible: Vec<Product> = products.iter().filter(|p| self.matches(p)).cloned().collect();
        let price = |p: &Product| resolve_unit_price(p, self.is_b2b, self.now);
        match self.sort {
            SortOption::Relevance => {}
            SortOption::PriceLowToHigh => visible.sort_by_key(|p| price(p)),
            SortOption::PriceHighToLow => visible.sort_by_key(|p| std::cmp::Reverse(price(p))),
            SortOption::Newest => visible.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOption::Rating => visible.sort_by(|a, b| b.rating.total_cmp(&a.rating)),
            SortOption::Discount => visible.sort_by_key(|p| std::cmp::Reverse(p.discount)),
        }
        visible
    }
}

impl Storefront {
    /// The product grid for the current category, search, filters and sort.
    pub fn visible_products(&self) -> Vec<Product> {
        let products = self.catalog.get_all();
        let category = self.state.selected_category.borrow().clone();
        let search = self.state.search_text.borrow().clone();
        let filters = self.state.filters.borrow().clone();
        let query = BrowseQuery {
            category: category.as_deref(),
            search: &search,
            filters: &filters,
            sort: *self.state.sort.borrow(),
            is_b2b: self.auth_flags().is_b2b,
            now: Utc::now(),
        };
        query.apply(&products)
    }

    pub fn select_category(&self, category: Option<&str>) -> Result<View> {
        self.state.selected_category.send_replace(category.map(str::to_string));
        self.navigate(View::Shop)
    }

    pub fn set_search_text(&self, text: &str) {
        self.state.search_text.send_replace(text.to_string());
    }

    pub fn set_filters(&self, filters: Filters) {
        self.state.filters.send_replace(filters);
    }

    pub fn set_sort(&self, sort: SortOption) {
        self.state.sort.send_replace(sort);
    }

    /// Opens a product page and records it as recently viewed.
    #[instrument(skip(self))]
    pub fn view_product(&self, product_id: &str) -> Result<Product> {
        let product = self
            .catalog
            .get_by_id(product_id)
            .ok_or_else(|| StorefrontError::ProductNotFound(product_id.to_string()))?;
        self.state.selected_product.send_replace(Some(product.id.clone()));

        let limit = self.config.recently_viewed_limit;
        let mut recent = Vec::new();
        self.state.recently_viewed.send_modify(|ids| {
            ids.retain(|id| *id != product.id);
            ids.insert(0, product.id.clone());
            ids.truncate(limit);
            recent = ids.clone();
        });
        write_json(self.storage.as_ref(), Scope::Durable, keys::RECENTLY_VIEWED, &recent);
        self.navigate(View::Product)?;
        Ok(product)
    }

    pub fn recently_viewed_products(&self) -> Vec<Product> {
        let ids = self.state.recently_viewed.borrow().clone();
        ids.iter().filter_map(|id| self.catalog.get_by_id(id)).collect()
    }

    /// Adds or removes a product from the comparison list. Returns whether it
    /// is in the list afterwards.
    pub fn toggle_compare(&self, product_id: &str) -> Result<bool> {
        if self.catalog.get_by_id(product_id).is_none() {
            return Err(StorefrontError::ProductNotFound(product_id.to_string()));
        }
        let limit = self.config.compare_limit;
        let mut outcome = Ok(false);
        self.state.compare.send_if_modified(|ids| {
            if let Some(index) = ids.iter().position(|id| id == product_id) {
                ids.remove(index);
                return true;
            }
            if ids.len() >= limit {
                outcome = Err(StorefrontError::CompareLimit(limit));
                return false;
            }
            ids.push(product_id.to_string());
            outcome = Ok(true);
            true
        });
        outcome.map_err(|e| self.fail(e))
    }

    pub fn clear_compare(&self) {
        self.state.compare.send_if_modified(|ids| {
            let had = !ids.is_empty();
            ids.clear();
            had
        });
    }

    pub fn compared_products(&self) -> Vec<Product> {
        let ids = self.state.compare.borrow().clone();
        ids.iter().filter_map(|id| self.catalog.get_by_id(id)).collect()
    }
}
