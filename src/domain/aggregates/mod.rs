//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod user;
pub mod address;
pub mod coupon;
pub mod content;

pub use product::{FlashSale, NewProduct, Product, SizeOption};
pub use order::{
    Order, OrderError, OrderLine, OrderStatus, PaymentMethod, RefundMethod, ReturnForm, ReturnRequest,
    ReturnStatus, ReturnType, StatusChange,
};
pub use cart::{Cart, CartError, CartItem, Customization};
pub use user::{AccountType, ProfileForm, User, WalletError};
pub use address::{Address, AddressForm};
pub use coupon::{Coupon, CouponForm, CouponKind};
pub use content::{
    Category, Faq, HeroSlide, Popup, Review, ReviewForm, ShippingSettings, ThemeMode, ThemeSettings, Transaction,
    TransactionCategory, TransactionKind,
};
