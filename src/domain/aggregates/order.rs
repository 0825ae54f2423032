//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::domain::aggregates::{Address, Customization};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderLine>,
    #[serde(default)]
    pub subtotal: Money,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub coupon_discount: Money,
    #[serde(default)]
    pub shipping_cost: Money,
    pub total: Money,
    pub shipping_address: Address,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    #[serde(default)]
    pub transaction_ref: Option<String>,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub size: String,
    pub quantity: u32,
    /// Unit price resolved at checkout.
    pub price: Money,
    #[serde(default)]
    pub customization: Option<Customization>,
    #[serde(default)]
    pub return_request: Option<ReturnRequest>,
}

impl OrderLine {
    pub fn line_total(&self) -> Money { self.price.multiply(self.quantity) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    #[serde(rename = "Pending Verification")]
    PendingVerification,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Shipped => write!(f, "Shipped"),
            Self::Delivered => write!(f, "Delivered"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::PendingVerification => write!(f, "Pending Verification"),
        }
    }
}

impl OrderStatus {
    /// Orders only move forward. Delivered and Cancelled are final.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (*self, next),
            (PendingVerification, Confirmed | Cancelled)
                | (Confirmed, Shipped | Delivered | Cancelled)
                | (Shipped, Delivered | Cancelled)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum PaymentMethod {
    Wallet,
    CashOnDelivery,
    /// Paid through an online gateway; confirmed immediately.
    Online,
    /// Manual bank transfer; needs admin verification of `reference`.
    BankTransfer { reference: String },
}

impl PaymentMethod {
    pub fn initial_status(&self) -> OrderStatus {
        match self {
            Self::BankTransfer { .. } => OrderStatus::PendingVerification,
            Self::Wallet | Self::CashOnDelivery | Self::Online => OrderStatus::Confirmed,
        }
    }

    pub fn transaction_ref(&self) -> Option<String> {
        match self {
            Self::BankTransfer { reference } => Some(reference.trim().to_string()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnStatus { Pending, Approved, Rejected }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnType { Refund, Exchange }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundMethod { Wallet, Original }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    pub reason: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    pub return_type: ReturnType,
    pub refund_method: RefundMethod,
    pub status: ReturnStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
}

/// Return request as submitted by the customer.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReturnForm {
    #[validate(length(min = 1, max = 200))]
    pub reason: String,
    #[validate(length(max = 1000))]
    pub comment: Option<String>,
    #[validate(url)]
    pub photo_url: Option<String>,
    pub return_type: ReturnType,
    pub refund_method: RefundMethod,
}

impl Order {
    pub fn line(&self, index: usize) -> Result<&OrderLine, OrderError> {
        self.items.get(index).ok_or(OrderError::LineNotFound)
    }

    pub fn set_status(&mut self, status: OrderStatus, at: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(status) {
            return Err(OrderError::InvalidTransition { from: self.status, to: status });
        }
        self.status = status;
        self.status_history.push(StatusChange { status, at });
        Ok(())
    }

    /// Customers may cancel until the parcel ships.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Confirmed | OrderStatus::PendingVerification => self.set_status(OrderStatus::Cancelled, at),
            _ => Err(OrderError::CannotCancel),
        }
    }

    pub fn request_return(&mut self, index: usize, form: ReturnForm, at: DateTime<Utc>) -> Result<(), OrderError> {
        if self.status != OrderStatus::Delivered { return Err(OrderError::NotDelivered); }
        let line = self.items.get_mut(index).ok_or(OrderError::LineNotFound)?;
        if line.return_request.is_some() { return Err(OrderError::ReturnAlreadyRequested); }
        line.return_request = Some(ReturnRequest {
            reason: form.reason.trim().to_string(),
            comment: form.comment.filter(|c| !c.trim().is_empty()),
            photo_url: form.photo_url,
            return_type: form.return_type,
            refund_method: form.refund_method,
            status: ReturnStatus::Pending,
            requested_at: at,
            decided_at: None,
        });
        Ok(())
    }

    /// Moves a pending return to `Approved` or `Rejected`. Decisions are final.
    pub fn decide_return(&mut self, index: usize, decision: ReturnStatus, at: DateTime<Utc>) -> Result<&ReturnRequest, OrderError> {
        if decision == ReturnStatus::Pending { return Err(OrderError::InvalidDecision); }
        let line = self.items.get_mut(index).ok_or(OrderError::LineNotFound)?;
        let request = line.return_request.as_mut().ok_or(OrderError::NoReturnRequest)?;
        if request.status != ReturnStatus::Pending { return Err(OrderError::ReturnAlreadyDecided); }
        request.status = decision;
        request.decided_at = Some(at);
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order line not found")]
    LineNotFound,
    #[error("Order can no longer be cancelled")]
    CannotCancel,
    #[error("Returns open once the order is delivered")]
    NotDelivered,
    #[error("A return was already requested for this item")]
    ReturnAlreadyRequested,
    #[error("No return requested for this item")]
    NoReturnRequest,
    #[error("Return request already decided")]
    ReturnAlreadyDecided,
    #[error("Returns can only be approved or rejected")]
    InvalidDecision,
    #[error("Order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}
