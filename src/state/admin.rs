//! Back-office mutations. Every operation here requires admin rights.

use chrono::Utc;
use tracing::{info, instrument, warn};
use validator::{Validate, ValidationError};

use super::{NoticeKind, Record, Storefront};
use crate::catalog::BulkPriceUpdate;
use crate::domain::aggregates::{
    AccountType, Category, Coupon, CouponForm, Faq, HeroSlide, NewProduct, Order, OrderStatus, Popup, Product,
    ShippingSettings, ThemeSettings, Transaction, TransactionCategory, TransactionKind, User,
};
use crate::domain::events::{DomainEvent, OrderEvent, UserEvent};
use crate::domain::value_objects::{CouponCode, Money};
use crate::gateway::collections;
use crate::{new_id, Result, StorefrontError};

/// Gives `record` a fresh id when it has none yet.
fn with_id<T: Record>(mut record: T) -> T {
    if record.id().trim().is_empty() {
        record.set_id(new_id());
    }
    record
}

fn required(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StorefrontError::invalid_field(field, ValidationError::new("required")));
    }
    Ok(())
}

impl Storefront {
    /// Moves an order to `status`. Delivery pays the buyer's referrer; a
    /// cancelled wallet order is refunded. Delivered and cancelled orders
    /// keep their status.
    #[instrument(skip(self))]
    pub fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<Order> {
        self.require_admin()?;
        let mut order = self.find_order(order_id)?;
        if order.status == status {
            return Ok(order);
        }
        order.set_status(status, Utc::now()).map_err(|e| self.fail(e.into()))?;
        self.save_order(order.clone());
        self.events.publish(DomainEvent::Order(OrderEvent::StatusChanged { order_id: order.id.clone(), status }));
        match status {
            OrderStatus::Delivered => self.credit_referral_commission(&order),
            OrderStatus::Cancelled => self.refund_cancelled(&order)?,
            _ => {}
        }
        info!(order_id, %status, "order status updated");
        Ok(order)
    }

    /// Credits the referrer of the order's buyer once per order.
    fn credit_referral_commission(&self, order: &Order) {
        let Some(referrer) = self.find_user(&order.user_id).and_then(|u| u.referred_by) else { return };
        let already_paid = self.state.transactions.borrow().iter().any(|t| {
            t.category == TransactionCategory::ReferralCommission && t.order_id.as_deref() == Some(order.id.as_str())
        });
        if already_paid {
            return;
        }
        let commission = order.total.percent(self.config.referral_commission_percent);
        if !commission.is_positive() {
            return;
        }
        if let Err(e) = self.post_wallet(
            &referrer,
            TransactionKind::Credit,
            TransactionCategory::ReferralCommission,
            commission,
            format!("Referral commission for order {}", order.id),
            Some(&order.id),
        ) {
            warn!(order_id = %order.id, %referrer, error = %e, "referral commission not paid");
        }
    }

    /// Creates or edits a coupon. Codes are unique ignoring case; editing
    /// keeps the use count.
    #[instrument(skip(self, form), fields(code = %form.code))]
    pub fn save_coupon(&self, form: CouponForm) -> Result<Coupon> {
        self.require_admin()?;
        form.validate()?;
        let code = CouponCode::new(form.code.as_str())
            .map_err(|_| StorefrontError::invalid_field("code", ValidationError::new("invalid")))?;
        let id = form.id.filter(|id| !id.trim().is_empty()).unwrap_or_else(new_id);

        let (taken, used_count) = {
            let coupons = self.state.coupons.borrow();
            let taken = coupons.iter().any(|c| c.code == code && c.id != id);
            let used = coupons.iter().find(|c| c.id == id).map_or(0, |c| c.used_count);
            (taken, used)
        };
        if taken {
            return Err(self.fail(StorefrontError::invalid_field("code", ValidationError::new("duplicate"))));
        }

        let coupon = Coupon {
            id,
            code,
            kind: form.kind,
            value: form.value,
            expires_at: form.expires_at,
            max_uses: form.max_uses,
            used_count,
        };
        self.upsert(&self.state.coupons, coupon.clone());
        self.notify(NoticeKind::Success, format!("Coupon {} saved", coupon.code));
        Ok(coupon)
    }

    #[instrument(skip(self))]
    pub fn delete_coupon(&self, id: &str) -> Result<()> {
        self.require_admin()?;
        self.remove(&self.state.coupons, id)?;
        let cleared = self.state.applied_coupon.send_if_modified(|applied| {
            if applied.as_ref().is_some_and(|c| c.id == id) {
                *applied = None;
                true
            } else {
                false
            }
        });
        if cleared {
            self.refresh_derived();
        }
        Ok(())
    }

    pub fn save_popup(&self, popup: Popup) -> Result<Popup> {
        self.require_admin()?;
        required("title", &popup.title)?;
        let popup = with_id(popup);
        self.upsert(&self.state.popups, popup.clone());
        Ok(popup)
    }

    pub fn delete_popup(&self, id: &str) -> Result<()> {
        self.require_admin()?;
        self.remove(&self.state.popups, id)?;
        Ok(())
    }

    /// Saves a category record. Renaming goes through
    /// [`rename_category`](Self::rename_category) so products follow.
    pub fn save_category(&self, category: Category) -> Result<Category> {
        self.require_admin()?;
        required("name", &category.name)?;
        let category = with_id(category);
        self.upsert(&self.state.categories, category.clone());
        self.state.categories.send_modify(|list| list.sort_by_key(|c| c.position));
        Ok(category)
    }

    /// Renames a category and moves its products along. Returns how many
    /// products changed.
    #[instrument(skip(self))]
    pub fn rename_category(&self, id: &str, new_name: &str) -> Result<usize> {
        self.require_admin()?;
        required("name", new_name)?;
        let mut category = self
            .state
            .categories
            .borrow()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| StorefrontError::RecordNotFound(format!("{}/{id}", collections::CATEGORIES)))?;
        let old_name = std::mem::replace(&mut category.name, new_name.trim().to_string());
        self.upsert(&self.state.categories, category.clone());

        let moved = self.catalog.rename_category_across_products(&old_name, &category.name);
        self.state.selected_category.send_if_modified(|selected| {
            if selected.as_deref() == Some(old_name.as_str()) {
                *selected = Some(category.name.clone());
                true
            } else {
                false
            }
        });
        self.refresh_cart_products();
        self.notify(NoticeKind::Success, format!("Category renamed; {moved} products updated"));
        Ok(moved)
    }

    pub fn delete_category(&self, id: &str) -> Result<()> {
        self.require_admin()?;
        self.remove(&self.state.categories, id)?;
        Ok(())
    }

    pub fn save_faq(&self, faq: Faq) -> Result<Faq> {
        self.require_admin()?;
        required("question", &faq.question)?;
        required("answer", &faq.answer)?;
        let faq = with_id(faq);
        self.upsert(&self.state.faqs, faq.clone());
        self.state.faqs.send_modify(|list| list.sort_by_key(|f| f.position));
        Ok(faq)
    }

    pub fn delete_faq(&self, id: &str) -> Result<()> {
        self.require_admin()?;
        self.remove(&self.state.faqs, id)?;
        Ok(())
    }

    pub fn save_banner(&self, banner: HeroSlide) -> Result<HeroSlide> {
        self.require_admin()?;
        required("image", &banner.image)?;
        let banner = with_id(banner);
        self.upsert(&self.state.banners, banner.clone());
        self.state.banners.send_modify(|list| list.sort_by_key(|b| b.position));
        Ok(banner)
    }

    pub fn delete_banner(&self, id: &str) -> Result<()> {
        self.require_admin()?;
        self.remove(&self.state.banners, id)?;
        Ok(())
    }

    /// Stores new shipping rules and re-prices the cart with them.
    #[instrument(skip(self))]
    pub fn save_shipping_settings(&self, settings: ShippingSettings) -> Result<()> {
        self.require_admin()?;
        if settings.flat_rate < Money::ZERO || settings.free_shipping_threshold < Money::ZERO {
            return Err(StorefrontError::invalid_field("shipping", ValidationError::new("negative")));
        }
        self.writes.set(collections::SETTINGS, collections::SHIPPING_DOC, &settings);
        self.state.shipping.send_replace(settings);
        self.refresh_derived();
        Ok(())
    }

    pub fn save_theme_settings(&self, settings: ThemeSettings) -> Result<()> {
        self.require_admin()?;
        self.writes.set(collections::SETTINGS, collections::THEME_DOC, &settings);
        self.state.theme_settings.send_replace(settings);
        Ok(())
    }

    /// Blocks or unblocks a user. Blocked users are turned away at sign-in.
    #[instrument(skip(self))]
    pub fn set_blacklisted(&self, user_id: &str, blacklisted: bool) -> Result<User> {
        self.require_admin()?;
        let mut user = self.find_user(user_id).ok_or_else(|| StorefrontError::UserNotFound(user_id.to_string()))?;
        if self.current_user().is_some_and(|me| me.id == user.id) {
            return Err(StorefrontError::NotAuthorized);
        }
        user.blacklisted = blacklisted;
        self.save_user(user.clone());
        self.events.publish(DomainEvent::User(UserEvent::Blacklisted { user_id: user.id.clone(), blacklisted }));
        Ok(user)
    }

    pub fn set_account_type(&self, user_id: &str, account_type: AccountType) -> Result<User> {
        self.require_admin()?;
        let mut user = self.find_user(user_id).ok_or_else(|| StorefrontError::UserNotFound(user_id.to_string()))?;
        user.account_type = account_type;
        self.save_user(user.clone());
        Ok(user)
    }

    /// Manual wallet correction with an audit note.
    #[instrument(skip(self, note))]
    pub fn adjust_wallet(&self, user_id: &str, amount: Money, kind: TransactionKind, note: &str) -> Result<Transaction> {
        self.require_admin()?;
        if !amount.is_positive() {
            return Err(StorefrontError::invalid_field("amount", ValidationError::new("positive")));
        }
        required("note", note)?;
        let (_, transaction) =
            self.post_wallet(user_id, kind, TransactionCategory::Adjustment, amount, note.trim(), None).map_err(|e| self.fail(e))?;
        Ok(transaction)
    }

    pub fn add_product(&self, form: NewProduct) -> Result<Product> {
        self.require_admin()?;
        self.catalog.add(form)
    }

    pub fn update_product(&self, product: Product) -> Result<Product> {
        self.require_admin()?;
        let product = self.catalog.update(product)?;
        self.refresh_cart_products();
        Ok(product)
    }

    pub fn delete_product(&self, id: &str) -> Result<()> {
        self.require_admin()?;
        self.catalog.delete(id)?;
        self.refresh_cart_products();
        Ok(())
    }

    pub fn bulk_update_prices(&self, update: &BulkPriceUpdate) -> Result<usize> {
        self.require_admin()?;
        let changed = self.catalog.bulk_update_prices(update);
        if changed > 0 {
            self.refresh_cart_products();
        }
        self.notify(NoticeKind::Success, format!("{changed} prices updated"));
        Ok(changed)
    }
}
