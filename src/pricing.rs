//! Cart pricing rules.
//!
//! Everything here is a pure function of its inputs so the state store can
//! recompute the summary after any change without side effects.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::aggregates::{CartItem, Coupon, Product, ShippingSettings};
use crate::domain::value_objects::Money;

/// A cart line with its resolved unit price.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedLine {
    pub item: CartItem,
    pub unit_price: Money,
    pub line_total: Money,
    pub line_mrp: Money,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub lines: Vec<PricedLine>,
    pub subtotal: Money,
    pub mrp: Money,
    pub discount_on_mrp: Money,
    pub coupon_discount: Money,
    pub shipping_cost: Money,
    pub total: Money,
    pub cod_available: bool,
}

/// Unit price a shopper pays: the B2B price for business accounts when the
/// product defines one, otherwise a running flash-sale price, otherwise the
/// list price.
pub fn resolve_unit_price(product: &Product, is_b2b: bool, now: DateTime<Utc>) -> Money {
    if is_b2b {
        if let Some(b2b) = product.b2b_price {
            return b2b;
        }
    }
    product.active_flash_price(now).unwrap_or(product.price)
}

pub fn coupon_discount(coupon: Option<&Coupon>, subtotal: Money) -> Money {
    match coupon {
        Some(c) if subtotal.is_positive() => c.discount_on(subtotal),
        _ => Money::ZERO,
    }
}

pub fn shipping_cost(subtotal: Money, settings: &ShippingSettings) -> Money {
    if !subtotal.is_positive() || subtotal >= settings.free_shipping_threshold {
        Money::ZERO
    } else {
        settings.flat_rate
    }
}

pub fn summarize(
    items: &[CartItem],
    is_b2b: bool,
    coupon: Option<&Coupon>,
    shipping: &ShippingSettings,
    now: DateTime<Utc>,
) -> CartSummary {
    let lines: Vec<PricedLine> = items
        .iter()
        .map(|item| {
            let unit_price = resolve_unit_price(&item.product, is_b2b, now);
            let qty = item.quantity.value();
            PricedLine {
                item: item.clone(),
                unit_price,
                line_total: unit_price.multiply(qty),
                line_mrp: item.product.original_price.multiply(qty),
            }
        })
        .collect();

    let subtotal: Money = lines.iter().map(|l| l.line_total).sum();
    let mrp: Money = lines.iter().map(|l| l.line_mrp).sum();
    let coupon_discount = coupon_discount(coupon, subtotal);
    let shipping_cost = shipping_cost(subtotal, shipping);
    let total = (subtotal - coupon_discount + shipping_cost).max(Money::ZERO);

    CartSummary {
        cod_available: items.iter().all(|i| i.product.cod_available),
        discount_on_mrp: mrp - subtotal,
        lines,
        subtotal,
        mrp,
        coupon_discount,
        shipping_cost,
        total,
    }
}
