//! Order placement and cancellation.

use chrono::Utc;
use tracing::{info, instrument};
use validator::ValidationError;

use super::{NoticeKind, Storefront, View};
use crate::domain::aggregates::{
    Order, OrderLine, PaymentMethod, StatusChange, TransactionCategory, TransactionKind,
};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::{new_id, Result, StorefrontError};

impl Storefront {
    /// The current user's orders, newest first.
    pub fn my_orders(&self) -> Vec<Order> {
        let Ok(user) = self.require_user() else { return Vec::new() };
        self.state.orders.borrow().iter().filter(|o| o.user_id == user.id).cloned().collect()
    }

    /// Turns the cart into an order. Nothing changes unless every check
    /// passes; a wallet payment is debited before the order is stored.
    #[instrument(skip(self, payment), fields(method = ?payment))]
    pub fn place_order(&self, payment: PaymentMethod) -> Result<Order> {
        let user = self.require_user()?;
        if self.state.cart.borrow().is_empty() {
            return Err(self.fail(StorefrontError::EmptyCart));
        }
        let address = self.delivery_address().ok_or_else(|| self.fail(StorefrontError::AddressRequired))?;
        let summary = self.cart_summary();

        match &payment {
            PaymentMethod::CashOnDelivery if !summary.cod_available => {
                return Err(self.fail(StorefrontError::CodUnavailable));
            }
            PaymentMethod::BankTransfer { reference } if reference.trim().is_empty() => {
                return Err(self.fail(StorefrontError::invalid_field("transactionRef", ValidationError::new("required"))));
            }
            _ => {}
        }

        let now = Utc::now();
        let coupon = self.state.applied_coupon.borrow().clone();
        let coupon = match coupon {
            Some(applied) => {
                let current = self.state.coupons.borrow().iter().find(|c| c.id == applied.id).cloned();
                match current.filter(|c| c.is_applicable(now)) {
                    Some(c) => Some(c),
                    None => {
                        self.state.applied_coupon.send_replace(None);
                        self.refresh_derived();
                        return Err(self.fail(StorefrontError::CouponNotApplicable(applied.code.to_string())));
                    }
                }
            }
            None => None,
        };

        let order_id = new_id();
        if payment == PaymentMethod::Wallet {
            self.post_wallet(
                &user.id,
                TransactionKind::Debit,
                TransactionCategory::OrderPayment,
                summary.total,
                format!("Payment for order {order_id}"),
                Some(&order_id),
            )
            .map_err(|e| self.fail(e))?;
        }

        let status = payment.initial_status();
        let order = Order {
            id: order_id,
            user_id: user.id.clone(),
            created_at: now,
            items: summary
                .lines
                .iter()
                .map(|line| OrderLine {
                    product_id: line.item.product.id.clone(),
                    name: line.item.product.name.clone(),
                    image: line.item.product.images.first().cloned(),
                    size: line.item.size.clone(),
                    quantity: line.item.quantity.value(),
                    price: line.unit_price,
                    customization: line.item.customization.clone(),
                    return_request: None,
                })
                .collect(),
            subtotal: summary.subtotal,
            coupon_code: coupon.as_ref().map(|c| c.code.to_string()),
            coupon_discount: summary.coupon_discount,
            shipping_cost: summary.shipping_cost,
            total: summary.total,
            shipping_address: address,
            transaction_ref: payment.transaction_ref(),
            payment_method: payment,
            status,
            status_history: vec![StatusChange { status, at: now }],
        };

        if let Some(mut coupon) = coupon {
            coupon.used_count += 1;
            self.upsert(&self.state.coupons, coupon);
        }
        self.save_order(order.clone());
        self.state.last_order_id.send_replace(Some(order.id.clone()));
        self.state.cart.send_replace(Default::default());
        self.state.applied_coupon.send_replace(None);
        self.refresh_derived();
        self.navigate(View::OrderConfirmation)?;

        self.events.publish(DomainEvent::Order(OrderEvent::Placed {
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            total: order.total,
        }));
        self.notify(NoticeKind::Success, "Order placed");
        info!(order_id = %order.id, total = %order.total, status = %order.status, "order placed");
        Ok(order)
    }

    /// Cancels an order that has not shipped. Only the owner or an admin may
    /// cancel; wallet-paid orders are refunded to the wallet.
    #[instrument(skip(self))]
    pub fn cancel_order(&self, order_id: &str) -> Result<Order> {
        let user = self.require_user()?;
        let mut order = self.find_order(order_id)?;
        if order.user_id != user.id && !self.auth_flags().is_admin {
            return Err(StorefrontError::NotAuthorized);
        }
        order.cancel(Utc::now()).map_err(|e| self.fail(e.into()))?;
        self.save_order(order.clone());
        self.refund_cancelled(&order)?;
        self.events.publish(DomainEvent::Order(OrderEvent::Cancelled { order_id: order.id.clone() }));
        self.notify(NoticeKind::Info, "Order cancelled");
        Ok(order)
    }

    /// Returns a cancelled wallet payment to the buyer's wallet.
    pub(super) fn refund_cancelled(&self, order: &Order) -> Result<()> {
        if order.payment_method != PaymentMethod::Wallet || !order.total.is_positive() {
            return Ok(());
        }
        let already_refunded = self.state.transactions.borrow().iter().any(|t| {
            t.category == TransactionCategory::Cancellation && t.order_id.as_deref() == Some(order.id.as_str())
        });
        if already_refunded {
            return Ok(());
        }
        self.post_wallet(
            &order.user_id,
            TransactionKind::Credit,
            TransactionCategory::Cancellation,
            order.total,
            format!("Refund for cancelled order {}", order.id),
            Some(&order.id),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::domain::aggregates::{NewProduct, OrderStatus, User, WalletError};
    use crate::domain::value_objects::Money;
    use crate::gateway::{collections, DocumentGateway};

    fn fund(h: &Harness, user: &User, amount: i64) {
        h.store
            .post_wallet(&user.id, TransactionKind::Credit, TransactionCategory::Adjustment, Money::from_major(amount), "top-up", None)
            .unwrap();
    }

    fn balance(h: &Harness) -> Money {
        h.store.current_user().unwrap().wallet_balance
    }

    #[tokio::test]
    async fn test_cod_order_snapshots_cart() {
        let h = harness().await;
        let p = h.product("Shirt", 1000, 1500);
        let (user, address) = h.shopper_with_address("asha@mail.in").await;
        h.store.add_to_cart(&p.id, "M", 2, None).unwrap();
        let mut events = h.store.events();

        let order = h.store.place_order(PaymentMethod::CashOnDelivery).unwrap();
        assert_eq!(order.user_id, user.id);
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.total, Money::from_major(2000));
        assert_eq!(order.items[0].price, Money::from_major(1000));
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.shipping_address.id, address.id);

        assert!(h.store.state().cart().borrow().is_empty());
        assert_eq!(h.store.current_view(), View::OrderConfirmation);
        assert_eq!(*h.store.state().last_order_id().borrow(), Some(order.id.clone()));
        assert_eq!(h.store.my_orders().len(), 1);
        assert!(matches!(events.try_recv(), Ok(DomainEvent::Order(OrderEvent::Placed { .. }))));

        h.store.flush_writes().await;
        assert!(h.gateway.get_document(collections::ORDERS, &order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_wallet_shortfall_rejects_without_side_effects() {
        let h = harness().await;
        let p = h.product("Jacket", 800, 1200);
        let (user, _) = h.shopper_with_address("asha@mail.in").await;
        fund(&h, &user, 500);
        h.store.add_to_cart(&p.id, "M", 1, None).unwrap();
        assert_eq!(h.store.cart_summary().total, Money::from_major(800));
        let transactions = h.store.state().transactions().borrow().len();

        let err = h.store.place_order(PaymentMethod::Wallet).unwrap_err();
        assert!(matches!(err, StorefrontError::Wallet(WalletError::InsufficientBalance { .. })));
        assert_eq!(balance(&h), Money::from_major(500));
        assert!(h.store.my_orders().is_empty());
        assert_eq!(h.store.state().transactions().borrow().len(), transactions);
        assert_eq!(h.store.state().cart().borrow().item_count(), 1);
    }

    #[tokio::test]
    async fn test_wallet_payment_debits_and_logs() {
        let h = harness().await;
        let p = h.product("Jacket", 800, 1200);
        let (user, _) = h.shopper_with_address("asha@mail.in").await;
        fund(&h, &user, 1500);
        h.store.add_to_cart(&p.id, "M", 1, None).unwrap();

        let order = h.store.place_order(PaymentMethod::Wallet).unwrap();
        assert_eq!(balance(&h), Money::from_major(700));
        let debit = h.store.state().transactions().borrow()[0].clone();
        assert_eq!(debit.kind, TransactionKind::Debit);
        assert_eq!(debit.category, TransactionCategory::OrderPayment);
        assert_eq!(debit.order_id.as_deref(), Some(order.id.as_str()));

        h.store.cancel_order(&order.id).unwrap();
        assert_eq!(balance(&h), Money::from_major(1500));
        assert_eq!(h.store.my_orders()[0].status, OrderStatus::Cancelled);
        assert!(h.store.cancel_order(&order.id).is_err());
        assert_eq!(balance(&h), Money::from_major(1500));
    }

    #[tokio::test]
    async fn test_bank_transfer_needs_reference() {
        let h = harness().await;
        let p = h.product("Shirt", 600, 900);
        h.shopper_with_address("asha@mail.in").await;
        h.store.add_to_cart(&p.id, "M", 1, None).unwrap();

        let blank = PaymentMethod::BankTransfer { reference: "  ".into() };
        assert!(matches!(h.store.place_order(blank), Err(StorefrontError::Validation(_))));
        let order = h.store.place_order(PaymentMethod::BankTransfer { reference: " UTR123 ".into() }).unwrap();
        assert_eq!(order.status, OrderStatus::PendingVerification);
        assert_eq!(order.transaction_ref.as_deref(), Some("UTR123"));
    }

    #[tokio::test]
    async fn test_checkout_preconditions() {
        let h = harness().await;
        let p = h.product("Shirt", 600, 900);
        let no_cod = h.store.catalog().add(NewProduct { cod_available: false, ..new_product("Print", 300, 400) }).unwrap();

        assert!(matches!(h.store.place_order(PaymentMethod::Online), Err(StorefrontError::NotAuthenticated)));
        h.shopper("asha@mail.in").await;
        assert!(matches!(h.store.place_order(PaymentMethod::Online), Err(StorefrontError::EmptyCart)));
        h.store.add_to_cart(&p.id, "M", 1, None).unwrap();
        assert!(matches!(h.store.place_order(PaymentMethod::Online), Err(StorefrontError::AddressRequired)));

        h.store.add_address(address_form()).unwrap();
        h.store.add_to_cart(&no_cod.id, "M", 1, None).unwrap();
        assert!(matches!(h.store.place_order(PaymentMethod::CashOnDelivery), Err(StorefrontError::CodUnavailable)));
        assert!(h.store.place_order(PaymentMethod::Online).is_ok());
    }

    #[tokio::test]
    async fn test_coupon_use_is_counted() {
        let h = harness().await;
        let p = h.product("Shirt", 1000, 1500);
        h.admin().await;
        let coupon = h
            .store
            .save_coupon(crate::domain::aggregates::CouponForm {
                id: None,
                code: "once".into(),
                kind: crate::domain::aggregates::CouponKind::Flat,
                value: rust_decimal::Decimal::from(100),
                expires_at: Utc::now() + chrono::Duration::days(1),
                max_uses: 1,
            })
            .unwrap();
        h.store.logout().await.unwrap();

        h.shopper_with_address("asha@mail.in").await;
        h.store.add_to_cart(&p.id, "M", 1, None).unwrap();
        h.store.apply_coupon("ONCE").unwrap();
        let order = h.store.place_order(PaymentMethod::Online).unwrap();
        assert_eq!(order.coupon_code.as_deref(), Some("ONCE"));
        assert_eq!(order.total, Money::from_major(900));
        let used = h.store.state().coupons().borrow().iter().find(|c| c.id == coupon.id).unwrap().used_count;
        assert_eq!(used, 1);
        assert!(h.store.state().applied_coupon().borrow().is_none());

        h.store.add_to_cart(&p.id, "M", 1, None).unwrap();
        assert!(h.store.apply_coupon("once").is_err());
    }

    #[tokio::test]
    async fn test_only_owner_or_admin_cancels() {
        let h = harness().await;
        let p = h.product("Shirt", 600, 900);
        h.shopper_with_address("asha@mail.in").await;
        h.store.add_to_cart(&p.id, "M", 1, None).unwrap();
        let order = h.store.place_order(PaymentMethod::CashOnDelivery).unwrap();
        h.store.logout().await.unwrap();

        h.shopper("other@mail.in").await;
        assert!(matches!(h.store.cancel_order(&order.id), Err(StorefrontError::NotAuthorized)));
        h.store.logout().await.unwrap();

        h.admin().await;
        assert_eq!(h.store.cancel_order(&order.id).unwrap().status, OrderStatus::Cancelled);
    }
}
