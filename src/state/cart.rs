//! Cart and coupon operations. Every change recomputes the cart summary.

use chrono::Utc;
use tracing::{debug, instrument};

use super::{NoticeKind, Storefront};
use crate::domain::aggregates::{CartError, CartItem, Coupon, Customization};
use crate::domain::value_objects::{CouponCode, Quantity};
use crate::{Result, StorefrontError};

impl Storefront {
    /// Adds `quantity` of `product_id` in `size`. Plain lines for the same
    /// product and size merge; customized lines never do.
    #[instrument(skip(self, customization))]
    pub fn add_to_cart(
        &self,
        product_id: &str,
        size: &str,
        quantity: u32,
        customization: Option<Customization>,
    ) -> Result<()> {
        let product = self
            .catalog
            .get_by_id(product_id)
            .ok_or_else(|| StorefrontError::ProductNotFound(product_id.to_string()))?;
        let quantity = Quantity::new(quantity).ok_or(StorefrontError::InvalidQuantity)?;
        if !product.sizes.is_empty() && !product.size(size).is_some_and(|s| s.in_stock) {
            return Err(self.fail(StorefrontError::SizeUnavailable { size: size.to_string() }));
        }
        if customization.is_some() && !product.allow_photo_customization {
            return Err(StorefrontError::CustomizationNotAllowed);
        }

        let name = product.name.clone();
        self.state.cart.send_modify(|cart| {
            cart.add_item(CartItem { product, size: size.to_string(), quantity, customization });
        });
        self.refresh_derived();
        self.notify(NoticeKind::Success, format!("{name} added to cart"));
        Ok(())
    }

    /// Sets the quantity of line `index`; zero removes the line.
    pub fn update_cart_quantity(&self, index: usize, quantity: u32) -> Result<()> {
        let mut outcome = Ok(());
        self.state.cart.send_if_modified(|cart| {
            outcome = cart.update_quantity(index, quantity);
            outcome.is_ok()
        });
        outcome?;
        self.refresh_derived();
        Ok(())
    }

    pub fn remove_from_cart(&self, index: usize) -> Result<CartItem> {
        let mut outcome = Err(CartError::ItemNotFound);
        self.state.cart.send_if_modified(|cart| {
            outcome = cart.remove_item(index);
            outcome.is_ok()
        });
        let removed = outcome?;
        self.refresh_derived();
        Ok(removed)
    }

    pub fn clear_cart(&self) {
        self.state.cart.send_if_modified(|cart| {
            let had = !cart.is_empty();
            cart.clear();
            had
        });
        self.refresh_derived();
    }

    /// Applies a coupon by code, case-insensitively. An empty code clears the
    /// applied coupon. A code that is unknown, expired or used up is refused
    /// and leaves no coupon applied.
    #[instrument(skip(self))]
    pub fn apply_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        if code.trim().is_empty() {
            self.state.applied_coupon.send_replace(None);
            self.refresh_derived();
            return Ok(None);
        }

        let now = Utc::now();
        let found = CouponCode::new(code).ok().and_then(|code| {
            self.state.coupons.borrow().iter().find(|c| c.code == code && c.is_applicable(now)).cloned()
        });
        let Some(coupon) = found else {
            debug!(code, "coupon refused");
            self.state.applied_coupon.send_replace(None);
            self.refresh_derived();
            return Err(self.fail(StorefrontError::CouponNotApplicable(code.trim().to_uppercase())));
        };

        self.state.applied_coupon.send_replace(Some(coupon.clone()));
        self.refresh_derived();
        let saved = self.state.summary.borrow().coupon_discount;
        self.notify(NoticeKind::Success, format!("Coupon {} applied: you save {saved}", coupon.code));
        Ok(Some(coupon))
    }
}
