//! Coupons

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::value_objects::{CouponCode, Money};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponKind {
    /// Fixed amount off, capped at the subtotal.
    Flat,
    /// Percentage off the subtotal.
    Percent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: String,
    pub code: CouponCode,
    pub kind: CouponKind,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    pub expires_at: DateTime<Utc>,
    pub max_uses: u32,
    #[serde(default)]
    pub used_count: u32,
}

impl Coupon {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }
    pub fn is_exhausted(&self) -> bool { self.used_count >= self.max_uses }
    pub fn is_applicable(&self, now: DateTime<Utc>) -> bool { !self.is_expired(now) && !self.is_exhausted() }

    /// Discount this coupon grants on `subtotal`.
    pub fn discount_on(&self, subtotal: Money) -> Money {
        if !subtotal.is_positive() { return Money::ZERO; }
        match self.kind {
            CouponKind::Flat => Money::new(self.value).min(subtotal),
            CouponKind::Percent => subtotal.percent(self.value),
        }
    }
}

/// Coupon editor form.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_coupon_value"))]
pub struct CouponForm {
    #[serde(default)]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    pub kind: CouponKind,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    pub expires_at: DateTime<Utc>,
    #[validate(range(min = 1))]
    pub max_uses: u32,
}

fn validate_coupon_value(form: &CouponForm) -> Result<(), ValidationError> {
    let ok = match form.kind {
        CouponKind::Flat => form.value > Decimal::ZERO,
        CouponKind::Percent => form.value > Decimal::ZERO && form.value <= Decimal::ONE_HUNDRED,
    };
    if ok { Ok(()) } else { Err(ValidationError::new("coupon_value")) }
}
