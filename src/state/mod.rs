//! Application state store.
//!
//! [`Storefront`] owns every collection except the catalog, the shopper's
//! session-local values and the values derived from them. Readers get
//! `watch::Receiver`s from [`AppState`]; only `Storefront` methods mutate.
//!
//! Mutations follow one policy: apply locally, queue the remote write on the
//! [`WriteQueue`], and carry on. A rejected write is logged by the queue and
//! the local change stays.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::catalog::CatalogStore;
use crate::config::StoreConfig;
use crate::domain::aggregates::{
    Address, Cart, Category, Coupon, Faq, HeroSlide, Order, Popup, Review, ShippingSettings, ThemeMode,
    ThemeSettings, Transaction, TransactionCategory, TransactionKind, User,
};
use crate::domain::events::{DomainEvent, EventBus, WalletEvent};
use crate::domain::value_objects::Money;
use crate::gateway::{collections, decode_all, load_collection, load_document, DocumentGateway, GatewayError, Subscription};
use crate::identity::{IdentityProvider, Session};
use crate::persistence::WriteQueue;
use crate::pricing::{self, CartSummary};
use crate::storage::{keys, read_json, KeyValueStore, Scope};
use crate::timers::{self, TimerHandle};
use crate::{new_id, Result, StorefrontError};

mod account;
mod addresses;
mod admin;
mod browse;
mod cart;
mod checkout;
mod navigation;
mod referrals;
mod returns;
mod session;

#[cfg(test)]
mod testing;

pub use browse::{Filters, SortOption};
pub use navigation::View;
pub use referrals::{OrderStats, ReferrerStats};
pub use session::{AuthFlags, Impersonation};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

/// Short-lived user-facing message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub message: String,
}

/// A persisted record kept in one of the state store's collections.
pub(crate) trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);
}

macro_rules! impl_record {
    ($($ty:ty => $collection:expr),* $(,)?) => {
        $(
            impl Record for $ty {
                const COLLECTION: &'static str = $collection;
                fn id(&self) -> &str { &self.id }
                fn set_id(&mut self, id: String) { self.id = id; }
            }
        )*
    };
}

impl_record! {
    User => collections::USERS,
    Order => collections::ORDERS,
    Address => collections::ADDRESSES,
    Coupon => collections::COUPONS,
    Popup => collections::POPUPS,
    Category => collections::CATEGORIES,
    Faq => collections::FAQS,
    Review => collections::REVIEWS,
    Transaction => collections::TRANSACTIONS,
    HeroSlide => collections::BANNERS,
}

/// Reactive containers. Fields are private: hold a receiver, never a sender.
pub struct AppState {
    users: watch::Sender<Vec<User>>,
    orders: watch::Sender<Vec<Order>>,
    addresses: watch::Sender<Vec<Address>>,
    coupons: watch::Sender<Vec<Coupon>>,
    popups: watch::Sender<Vec<Popup>>,
    categories: watch::Sender<Vec<Category>>,
    faqs: watch::Sender<Vec<Faq>>,
    reviews: watch::Sender<Vec<Review>>,
    transactions: watch::Sender<Vec<Transaction>>,
    banners: watch::Sender<Vec<HeroSlide>>,
    theme_settings: watch::Sender<ThemeSettings>,
    shipping: watch::Sender<ShippingSettings>,

    view: watch::Sender<View>,
    pending_view: watch::Sender<Option<View>>,
    selected_category: watch::Sender<Option<String>>,
    selected_product: watch::Sender<Option<String>>,
    search_text: watch::Sender<String>,
    filters: watch::Sender<Filters>,
    sort: watch::Sender<SortOption>,
    cart: watch::Sender<Cart>,
    applied_coupon: watch::Sender<Option<Coupon>>,
    selected_address: watch::Sender<Option<String>>,
    recently_viewed: watch::Sender<Vec<String>>,
    compare: watch::Sender<Vec<String>>,
    session: watch::Sender<Option<Session>>,
    current_user: watch::Sender<Option<User>>,
    impersonation: watch::Sender<Option<Impersonation>>,
    notice: watch::Sender<Option<Notice>>,
    last_order_id: watch::Sender<Option<String>>,
    language: watch::Sender<String>,
    theme_mode: watch::Sender<ThemeMode>,

    summary: watch::Sender<CartSummary>,
    auth: watch::Sender<AuthFlags>,
}

macro_rules! receivers {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&self) -> watch::Receiver<$ty> { self.$name.subscribe() }
        )*
    };
}

impl AppState {
    fn new(shipping: ShippingSettings) -> Self {
        Self {
            users: watch::channel(Vec::new()).0,
            orders: watch::channel(Vec::new()).0,
            addresses: watch::channel(Vec::new()).0,
            coupons: watch::channel(Vec::new()).0,
            popups: watch::channel(Vec::new()).0,
            categories: watch::channel(Vec::new()).0,
            faqs: watch::channel(Vec::new()).0,
            reviews: watch::channel(Vec::new()).0,
            transactions: watch::channel(Vec::new()).0,
            banners: watch::channel(Vec::new()).0,
            theme_settings: watch::channel(ThemeSettings::default()).0,
            shipping: watch::channel(shipping).0,
            view: watch::channel(View::Home).0,
            pending_view: watch::channel(None).0,
            selected_category: watch::channel(None).0,
            selected_product: watch::channel(None).0,
            search_text: watch::channel(String::new()).0,
            filters: watch::channel(Filters::default()).0,
            sort: watch::channel(SortOption::default()).0,
            cart: watch::channel(Cart::new()).0,
            applied_coupon: watch::channel(None).0,
            selected_address: watch::channel(None).0,
            recently_viewed: watch::channel(Vec::new()).0,
            compare: watch::channel(Vec::new()).0,
            session: watch::channel(None).0,
            current_user: watch::channel(None).0,
            impersonation: watch::channel(None).0,
            notice: watch::channel(None).0,
            last_order_id: watch::channel(None).0,
            language: watch::channel("en".to_string()).0,
            theme_mode: watch::channel(ThemeMode::default()).0,
            summary: watch::channel(CartSummary::default()).0,
            auth: watch::channel(AuthFlags::default()).0,
        }
    }

    receivers! {
        users: Vec<User>,
        orders: Vec<Order>,
        addresses: Vec<Address>,
        coupons: Vec<Coupon>,
        popups: Vec<Popup>,
        categories: Vec<Category>,
        faqs: Vec<Faq>,
        reviews: Vec<Review>,
        transactions: Vec<Transaction>,
        banners: Vec<HeroSlide>,
        theme_settings: ThemeSettings,
        shipping: ShippingSettings,
        view: View,
        pending_view: Option<View>,
        selected_category: Option<String>,
        selected_product: Option<String>,
        search_text: String,
        filters: Filters,
        sort: SortOption,
        cart: Cart,
        applied_coupon: Option<Coupon>,
        selected_address: Option<String>,
        recently_viewed: Vec<String>,
        compare: Vec<String>,
        session: Option<Session>,
        current_user: Option<User>,
        impersonation: Option<Impersonation>,
        notice: Option<Notice>,
        last_order_id: Option<String>,
        language: String,
        theme_mode: ThemeMode,
        summary: CartSummary,
        auth: AuthFlags,
    }
}

/// The storefront's state engine. Create with [`Storefront::new`], then
/// [`load_all`](Storefront::load_all) and [`start`](Storefront::start).
///
/// Must be used inside a Tokio runtime: writes, listeners and notice timers
/// run as tasks.
pub struct Storefront {
    config: StoreConfig,
    gateway: Arc<dyn DocumentGateway>,
    identity: Arc<dyn IdentityProvider>,
    storage: Arc<dyn KeyValueStore>,
    writes: WriteQueue,
    events: EventBus,
    catalog: CatalogStore,
    state: Arc<AppState>,
    load_generation: AtomicU64,
    resolve_lock: tokio::sync::Mutex<()>,
    notice_seq: AtomicU64,
    notice_timer: Mutex<Option<TimerHandle>>,
    listeners: Mutex<Vec<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Storefront {
    pub fn new(
        config: StoreConfig,
        gateway: Arc<dyn DocumentGateway>,
        identity: Arc<dyn IdentityProvider>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Arc<Self> {
        let events = EventBus::default();
        let (writes, _worker) = WriteQueue::spawn(Arc::clone(&gateway));
        let catalog = CatalogStore::new(Arc::clone(&gateway), writes.clone(), events.clone());
        let state = Arc::new(AppState::new(config.shipping));

        if let Some(language) = storage.get(Scope::Durable, keys::LANGUAGE) {
            state.language.send_replace(language);
        }
        if let Some(mode) = read_json::<ThemeMode>(storage.as_ref(), Scope::Durable, keys::THEME) {
            state.theme_mode.send_replace(mode);
        }
        if let Some(ids) = read_json::<Vec<String>>(storage.as_ref(), Scope::Durable, keys::RECENTLY_VIEWED) {
            state.recently_viewed.send_replace(ids);
        }
        if let Some(user) = read_json::<User>(storage.as_ref(), Scope::Session, keys::CURRENT_USER) {
            debug!(user_id = %user.id, "restored user from session storage");
            state.current_user.send_replace(Some(user));
        }

        Arc::new(Self {
            config,
            gateway,
            identity,
            storage,
            writes,
            events,
            catalog,
            state,
            load_generation: AtomicU64::new(0),
            resolve_lock: tokio::sync::Mutex::new(()),
            notice_seq: AtomicU64::new(0),
            notice_timer: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> &AppState { &self.state }

    pub fn catalog(&self) -> &CatalogStore { &self.catalog }

    pub fn config(&self) -> &StoreConfig { &self.config }

    pub fn events(&self) -> broadcast::Receiver<DomainEvent> { self.events.subscribe() }

    pub fn event_bus(&self) -> &EventBus { &self.events }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Loads every collection. The request is numbered when `load_all` is
    /// called; if a newer load starts before this one finishes, this one's
    /// results are discarded. Returns whether the results were applied.
    pub fn load_all(&self) -> impl Future<Output = bool> + '_ {
        let generation = self.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            let gw = self.gateway.as_ref();
            let (users, orders, addresses, coupons, popups, categories, faqs, reviews, transactions, banners) = tokio::join!(
                load_collection::<User>(gw, collections::USERS),
                load_collection::<Order>(gw, collections::ORDERS),
                load_collection::<Address>(gw, collections::ADDRESSES),
                load_collection::<Coupon>(gw, collections::COUPONS),
                load_collection::<Popup>(gw, collections::POPUPS),
                load_collection::<Category>(gw, collections::CATEGORIES),
                load_collection::<Faq>(gw, collections::FAQS),
                load_collection::<Review>(gw, collections::REVIEWS),
                load_collection::<Transaction>(gw, collections::TRANSACTIONS),
                load_collection::<HeroSlide>(gw, collections::BANNERS),
            );
            let (shipping, theme, ()) = tokio::join!(
                load_document::<ShippingSettings>(gw, collections::SETTINGS, collections::SHIPPING_DOC),
                load_document::<ThemeSettings>(gw, collections::SETTINGS, collections::THEME_DOC),
                self.catalog.load(),
            );

            if self.load_generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "discarding superseded load");
                return false;
            }

            apply_loaded(&self.state.users, users, collections::USERS);
            apply_loaded(&self.state.orders, orders.map(newest_orders_first), collections::ORDERS);
            apply_loaded(&self.state.addresses, addresses, collections::ADDRESSES);
            apply_loaded(&self.state.coupons, coupons, collections::COUPONS);
            apply_loaded(&self.state.popups, popups, collections::POPUPS);
            apply_loaded(&self.state.categories, categories.map(|mut c| { c.sort_by_key(|c| c.position); c }), collections::CATEGORIES);
            apply_loaded(&self.state.faqs, faqs.map(|mut f| { f.sort_by_key(|f| f.position); f }), collections::FAQS);
            apply_loaded(&self.state.reviews, reviews, collections::REVIEWS);
            apply_loaded(
                &self.state.transactions,
                transactions.map(|mut t| { t.sort_by(|a, b| b.created_at.cmp(&a.created_at)); t }),
                collections::TRANSACTIONS,
            );
            apply_loaded(&self.state.banners, banners.map(|mut b| { b.sort_by_key(|b| b.position); b }), collections::BANNERS);
            apply_setting(&self.state.shipping, shipping, collections::SHIPPING_DOC);
            apply_setting(&self.state.theme_settings, theme, collections::THEME_DOC);

            self.refresh_current_user_from_list();
            self.refresh_cart_products();
            info!(generation, "storefront state loaded");
            true
        }
    }

    /// Starts the standing listeners: the orders feed, the identity session
    /// and cross-tab theme changes. Stopped by [`shutdown`](Self::shutdown).
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let state = Arc::clone(&self.state);
        let orders = self
            .gateway
            .listen_collection(
                collections::ORDERS,
                Arc::new(move |docs| {
                    let orders = newest_orders_first(decode_all(collections::ORDERS, &docs));
                    state.orders.send_replace(orders);
                }),
            )
            .await?;
        lock(&self.listeners).push(orders);

        let mut sessions = self.identity.session();
        let weak = Arc::downgrade(self);
        let session_sync = tokio::spawn(async move {
            while sessions.changed().await.is_ok() {
                let session = sessions.borrow_and_update().clone();
                let Some(store) = weak.upgrade() else { break };
                if let Err(e) = store.handle_session_change(session).await {
                    warn!(error = %e, "session change rejected");
                }
            }
        });

        let mut changes = self.storage.changes();
        let tab = self.storage.tab_id();
        let state = Arc::clone(&self.state);
        let theme_sync = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if change.key == keys::THEME && change.origin != tab => {
                        if let Some(mode) = change.value.and_then(|v| serde_json::from_str::<ThemeMode>(&v).ok()) {
                            state.theme_mode.send_replace(mode);
                        }
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        lock(&self.tasks).extend([session_sync, theme_sync]);
        info!("storefront started");
        Ok(())
    }

    /// Stops listeners and background tasks, then waits for queued writes.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        for listener in lock(&self.listeners).drain(..) {
            listener.unsubscribe();
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        lock(&self.notice_timer).take();
        self.writes.flush().await;
        info!("storefront stopped");
    }

    /// Waits until every queued remote write has been attempted.
    pub async fn flush_writes(&self) { self.writes.flush().await; }

    // ---------------------------------------------------------------------
    // Shared helpers
    // ---------------------------------------------------------------------

    pub fn current_user(&self) -> Option<User> { self.state.current_user.borrow().clone() }

    pub fn auth_flags(&self) -> AuthFlags { *self.state.auth.borrow() }

    pub fn cart_summary(&self) -> CartSummary { self.state.summary.borrow().clone() }

    pub fn current_view(&self) -> View { *self.state.view.borrow() }

    /// The signed-in user. A user restored from session storage only counts
    /// once the identity provider has confirmed the session.
    fn require_user(&self) -> Result<User> {
        if self.state.session.borrow().is_none() {
            return Err(StorefrontError::NotAuthenticated);
        }
        self.current_user().ok_or(StorefrontError::NotAuthenticated)
    }

    fn require_admin(&self) -> Result<()> {
        if self.auth_flags().is_admin {
            Ok(())
        } else {
            Err(StorefrontError::NotAuthorized)
        }
    }

    /// Shows `message`, replacing any current notice and its dismissal timer.
    pub(crate) fn notify(&self, kind: NoticeKind, message: impl Into<String>) {
        let id = self.notice_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.state.notice.send_replace(Some(Notice { id, kind, message: message.into() }));
        let state = Arc::clone(&self.state);
        let dismiss = timers::after(self.config.notice_ttl, move || {
            state.notice.send_if_modified(|notice| match notice {
                Some(n) if n.id == id => {
                    *notice = None;
                    true
                }
                _ => false,
            });
        });
        *lock(&self.notice_timer) = Some(dismiss);
    }

    /// Surfaces `error` as a notice and hands it back for `?`.
    fn fail(&self, error: StorefrontError) -> StorefrontError {
        self.notify(NoticeKind::Error, error.to_string());
        error
    }

    pub fn dismiss_notice(&self) {
        lock(&self.notice_timer).take();
        self.state.notice.send_replace(None);
    }

    fn persist<T: Record>(&self, record: &T) {
        self.writes.set(T::COLLECTION, record.id(), record);
    }

    /// Replaces the record with the same id, or appends it.
    fn upsert<T: Record>(&self, container: &watch::Sender<Vec<T>>, record: T) {
        self.persist(&record);
        container.send_modify(|list| match list.iter_mut().find(|r| r.id() == record.id()) {
            Some(slot) => *slot = record,
            None => list.push(record),
        });
    }

    fn remove<T: Record>(&self, container: &watch::Sender<Vec<T>>, id: &str) -> Result<T> {
        let mut removed = None;
        container.send_if_modified(|list| match list.iter().position(|r| r.id() == id) {
            Some(index) => {
                removed = Some(list.remove(index));
                true
            }
            None => false,
        });
        let record = removed.ok_or_else(|| StorefrontError::RecordNotFound(format!("{}/{id}", T::COLLECTION)))?;
        self.writes.delete(T::COLLECTION, id);
        Ok(record)
    }

    fn find_user(&self, user_id: &str) -> Option<User> {
        if let Some(user) = self.current_user().filter(|u| u.id == user_id) {
            return Some(user);
        }
        self.state.users.borrow().iter().find(|u| u.id == user_id).cloned()
    }

    /// Like [`find_user`](Self::find_user), falling back to the backend. A
    /// user found there joins the users list.
    async fn load_user(&self, user_id: &str) -> Result<Option<User>> {
        if let Some(user) = self.find_user(user_id) {
            return Ok(Some(user));
        }
        let Some(user) = load_document::<User>(self.gateway.as_ref(), collections::USERS, user_id).await? else {
            return Ok(None);
        };
        self.state.users.send_if_modified(|users| {
            if users.iter().any(|u| u.id == user.id) {
                return false;
            }
            users.push(user.clone());
            true
        });
        Ok(Some(user))
    }

    fn find_order(&self, order_id: &str) -> Result<Order> {
        self.state
            .orders
            .borrow()
            .iter()
            .find(|o| o.id == order_id)
            .cloned()
            .ok_or_else(|| StorefrontError::OrderNotFound(order_id.to_string()))
    }

    /// Writes a user back everywhere it is held: the users list, the current
    /// user (and its session copy), and the backend.
    fn save_user(&self, user: User) {
        if self.current_user().is_some_and(|u| u.id == user.id) {
            crate::storage::write_json(self.storage.as_ref(), Scope::Session, keys::CURRENT_USER, &user);
            self.state.current_user.send_replace(Some(user.clone()));
        }
        self.upsert(&self.state.users, user);
        self.refresh_derived();
    }

    fn save_order(&self, order: Order) {
        self.persist(&order);
        self.state.orders.send_modify(|orders| match orders.iter_mut().find(|o| o.id == order.id) {
            Some(slot) => *slot = order,
            None => orders.insert(0, order),
        });
    }

    /// Credits or debits a wallet and logs the matching transaction.
    fn post_wallet(
        &self,
        user_id: &str,
        kind: TransactionKind,
        category: TransactionCategory,
        amount: Money,
        description: impl Into<String>,
        order_id: Option<&str>,
    ) -> Result<(User, Transaction)> {
        let mut user = self.find_user(user_id).ok_or_else(|| StorefrontError::UserNotFound(user_id.to_string()))?;
        match kind {
            TransactionKind::Credit => user.credit(amount),
            TransactionKind::Debit => user.debit(amount)?,
        }
        let transaction = Transaction {
            id: new_id(),
            user_id: user.id.clone(),
            kind,
            category,
            amount,
            description: description.into(),
            order_id: order_id.map(str::to_string),
            created_at: Utc::now(),
        };
        self.save_user(user.clone());
        self.persist(&transaction);
        self.state.transactions.send_modify(|list| list.insert(0, transaction.clone()));

        let (user_id, transaction_id) = (user.id.clone(), transaction.id.clone());
        self.events.publish(DomainEvent::Wallet(match kind {
            TransactionKind::Credit => WalletEvent::Credited { user_id, amount, transaction_id },
            TransactionKind::Debit => WalletEvent::Debited { user_id, amount, transaction_id },
        }));
        info!(user_id = %user.id, ?kind, ?category, %amount, "wallet updated");
        Ok((user, transaction))
    }

    fn refresh_current_user_from_list(&self) {
        let Some(current) = self.current_user() else { return };
        let fresh = self.state.users.borrow().iter().find(|u| u.id == current.id).cloned();
        if let Some(fresh) = fresh.filter(|f| *f != current) {
            self.state.current_user.send_replace(Some(fresh));
        }
    }

    /// Re-reads cart products from the catalog, dropping deleted ones, then
    /// re-prices the cart.
    fn refresh_cart_products(&self) {
        let products = self.catalog.get_all();
        self.state.cart.send_if_modified(|cart| {
            let before = cart.clone();
            cart.refresh_products(&products);
            *cart != before
        });
        self.refresh_derived();
    }

    /// Recomputes the cart summary and the authorization flags. Receivers
    /// are only notified when a value actually changed.
    fn refresh_derived(&self) {
        let auth = self.compute_auth();
        self.state.auth.send_if_modified(|current| {
            let changed = *current != auth;
            *current = auth;
            changed
        });

        let summary = pricing::summarize(
            self.state.cart.borrow().items(),
            auth.is_b2b,
            self.state.applied_coupon.borrow().as_ref(),
            &self.state.shipping.borrow(),
            Utc::now(),
        );
        self.state.summary.send_if_modified(|current| {
            if *current == summary {
                false
            } else {
                *current = summary;
                true
            }
        });
    }
}

fn apply_loaded<T>(container: &watch::Sender<Vec<T>>, loaded: std::result::Result<Vec<T>, GatewayError>, collection: &str) {
    match loaded {
        Ok(records) => {
            debug!(collection, count = records.len(), "collection loaded");
            container.send_replace(records);
        }
        Err(e) => warn!(collection, error = %e, "collection load failed"),
    }
}

fn apply_setting<T>(container: &watch::Sender<T>, loaded: std::result::Result<Option<T>, GatewayError>, doc: &str) {
    match loaded {
        Ok(Some(value)) => {
            container.send_replace(value);
        }
        Ok(None) => debug!(doc, "setting not stored; keeping default"),
        Err(e) => warn!(doc, error = %e, "setting load failed"),
    }
}

fn newest_orders_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}
