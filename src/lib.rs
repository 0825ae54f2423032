//! OpenSASE Storefront
//!
//! State engine behind the storefront web app: the product catalog, the
//! shopper's session (cart, coupon, addresses, wallet), checkout, returns and
//! the admin back-office, all kept in reactive containers over a remote
//! document store.
//!
//! ## Modules
//! - [`catalog`] - product catalog with optimistic CRUD and bulk re-pricing
//! - [`state`] - application state store, derived values, navigation guard
//! - [`pricing`] - pure cart pricing rules
//! - [`gateway`] - document store contract plus memory and PostgreSQL backends
//! - [`identity`] - sign-in provider contract and a local implementation
//! - [`storage`] - session/durable key-value storage
//! - [`timers`] - cancellable timers, countdowns and slideshows

use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

pub mod catalog;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod identity;
pub mod persistence;
pub mod pricing;
pub mod state;
pub mod storage;
pub mod timers;

pub use catalog::{AdjustDirection, AdjustMode, BulkPriceUpdate, CatalogStore, PriceScope};
pub use config::StoreConfig;
pub use domain::aggregates::*;
pub use domain::events::{DomainEvent, EventBus};
pub use domain::value_objects::{CouponCode, Money, Quantity};
pub use pricing::CartSummary;
pub use state::{AppState, AuthFlags, Notice, NoticeKind, Storefront, View};

use crate::gateway::GatewayError;
use crate::identity::AuthError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error("Sign in required")]
    NotAuthenticated,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Address not found: {0}")]
    AddressNotFound(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Your cart is empty")]
    EmptyCart,

    #[error("Select a delivery address")]
    AddressRequired,

    #[error("Cash on delivery is not available for every item in the cart")]
    CodUnavailable,

    #[error("Size {size} is not available")]
    SizeUnavailable { size: String },

    #[error("Photo customization is not offered for this product")]
    CustomizationNotAllowed,

    #[error("Invalid quantity")]
    InvalidQuantity,

    #[error("Invalid referral code")]
    InvalidReferralCode,

    #[error("Coupon {0} is invalid or expired")]
    CouponNotApplicable(String),

    #[error("You can compare up to {0} products")]
    CompareLimit(usize),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Gateway(#[from] GatewayError),
}

impl StorefrontError {
    pub fn invalid_field(field: &'static str, error: ValidationError) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, error);
        Self::Validation(errors)
    }
}

pub type Result<T> = std::result::Result<T, StorefrontError>;

/// Fresh record id: a time-ordered UUID.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
