//! Fixtures shared by the state store tests.

use chrono::Utc;
use std::sync::Arc;

use super::Storefront;
use crate::config::StoreConfig;
use crate::domain::aggregates::{
    Address, AddressForm, NewProduct, Order, OrderLine, OrderStatus, PaymentMethod, Product, SizeOption, StatusChange,
    User,
};
use crate::domain::value_objects::Money;
use crate::gateway::{collections, MemoryGateway};
use crate::identity::LocalIdentityProvider;
use crate::storage::MemoryStorage;

pub const ADMIN_EMAIL: &str = "admin@shop.in";

pub struct Harness {
    pub store: Arc<Storefront>,
    pub gateway: MemoryGateway,
    pub identity: Arc<LocalIdentityProvider>,
    pub storage: Arc<MemoryStorage>,
}

pub async fn harness() -> Harness {
    harness_with(MemoryGateway::new()).await
}

pub async fn harness_with(gateway: MemoryGateway) -> Harness {
    let identity = Arc::new(LocalIdentityProvider::new());
    let storage = Arc::new(MemoryStorage::new());
    let store = Storefront::new(
        StoreConfig::default().with_admin(ADMIN_EMAIL),
        Arc::new(gateway.clone()),
        identity.clone(),
        storage.clone(),
    );
    assert!(store.load_all().await);
    Harness { store, gateway, identity, storage }
}

impl Harness {
    /// Registers and signs in a shopper.
    pub async fn shopper(&self, email: &str) -> User {
        self.store.register_with_email("Asha Rao", email, "secret-pass").await.unwrap()
    }

    pub async fn admin(&self) -> User {
        self.store.register_with_email("Store Admin", ADMIN_EMAIL, "admin-pass").await.unwrap()
    }

    /// Adds a product straight to the catalog.
    pub fn product(&self, name: &str, price: i64, mrp: i64) -> Product {
        self.store.catalog().add(new_product(name, price, mrp)).unwrap()
    }

    pub async fn shopper_with_address(&self, email: &str) -> (User, Address) {
        let user = self.shopper(email).await;
        let address = self.store.add_address(address_form()).unwrap();
        (user, address)
    }

    /// Stores `order` in the backend and reloads, as if another session had
    /// written it.
    pub async fn seed_order(&self, order: &Order) {
        self.store.flush_writes().await;
        self.gateway.insert(collections::ORDERS, &order.id, order).await.unwrap();
        assert!(self.store.load_all().await);
    }
}

pub fn new_product(name: &str, price: i64, mrp: i64) -> NewProduct {
    NewProduct {
        name: name.into(),
        brand: "Acme".into(),
        price: Money::from_major(price),
        original_price: Money::from_major(mrp),
        images: vec![format!("https://cdn.shop.in/{name}.jpg")],
        sizes: vec![
            SizeOption { name: "M".into(), in_stock: true },
            SizeOption { name: "XL".into(), in_stock: false },
        ],
        details: vec![],
        fit: None,
        fabric: None,
        category: "Shirts".into(),
        cod_available: true,
        allow_photo_customization: false,
        b2b_price: None,
        flash_sale: None,
    }
}

pub fn address_form() -> AddressForm {
    AddressForm {
        name: "Asha Rao".into(),
        mobile: "9876543210".into(),
        line1: "12 MG Road".into(),
        line2: None,
        landmark: None,
        pincode: "560001".into(),
        locality: "Ashok Nagar".into(),
        city: "Bengaluru".into(),
        state: "Karnataka".into(),
        make_default: false,
    }
}

pub fn delivered_order(id: &str, user_id: &str) -> Order {
    let mut order = sample_order(id, user_id);
    order.set_status(OrderStatus::Delivered, Utc::now()).unwrap();
    order
}

pub fn sample_order(id: &str, user_id: &str) -> Order {
    let now = Utc::now();
    Order {
        id: id.into(),
        user_id: user_id.into(),
        created_at: now,
        items: vec![OrderLine {
            product_id: "P1".into(),
            name: "Shirt".into(),
            image: None,
            size: "M".into(),
            quantity: 2,
            price: Money::from_major(300),
            customization: None,
            return_request: None,
        }],
        subtotal: Money::from_major(600),
        coupon_code: None,
        coupon_discount: Money::ZERO,
        shipping_cost: Money::ZERO,
        total: Money::from_major(600),
        shipping_address: Address::default(),
        payment_method: PaymentMethod::CashOnDelivery,
        status: OrderStatus::Confirmed,
        transaction_ref: None,
        status_history: vec![StatusChange { status: OrderStatus::Confirmed, at: now }],
    }
}
