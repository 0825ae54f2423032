//! Browser-style key/value storage.
//!
//! Two scopes: `Session` lives as long as the tab, `Durable` survives restarts
//! and is shared by every tab. Writes to the durable scope are announced on
//! [`KeyValueStore::changes`] so other tabs can follow (theme sync).

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::warn;

/// Well-known keys.
pub mod keys {
    /// Session scope: the serialized domain user.
    pub const CURRENT_USER: &str = "currentUser";
    pub const LANGUAGE: &str = "language";
    pub const RECENTLY_VIEWED: &str = "recentlyViewed";
    pub const THEME: &str = "theme";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Session,
    Durable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageChange {
    pub scope: Scope,
    pub key: String,
    /// `None` when the key was removed.
    pub value: Option<String>,
    /// Tab that made the change.
    pub origin: u64,
}

pub trait KeyValueStore: Send + Sync {
    /// Identifies this tab in [`StorageChange::origin`].
    fn tab_id(&self) -> u64;

    fn get(&self, scope: Scope, key: &str) -> Option<String>;

    fn set(&self, scope: Scope, key: &str, value: String);

    fn remove(&self, scope: Scope, key: &str);

    fn changes(&self) -> broadcast::Receiver<StorageChange>;
}

/// Reads a JSON value, treating unreadable entries as absent.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, scope: Scope, key: &str) -> Option<T> {
    let raw = store.get(scope, key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "ignoring unreadable stored value");
            None
        }
    }
}

pub fn write_json<T: Serialize>(store: &dyn KeyValueStore, scope: Scope, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(raw) => store.set(scope, key, raw),
        Err(e) => warn!(key, error = %e, "could not serialize value for storage"),
    }
}

type Area = RwLock<HashMap<String, String>>;

struct Shared {
    durable: Area,
    changes: broadcast::Sender<StorageChange>,
    next_tab: AtomicU64,
}

/// In-memory storage. [`MemoryStorage::open_tab`] gives a second tab that
/// shares the durable area and change feed but has its own session area.
pub struct MemoryStorage {
    shared: Arc<Shared>,
    session: Area,
    tab: u64,
}

impl Default for MemoryStorage {
    fn default() -> Self { Self::new() }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        let shared = Arc::new(Shared { durable: RwLock::default(), changes, next_tab: AtomicU64::new(1) });
        Self { shared, session: RwLock::default(), tab: 0 }
    }

    pub fn open_tab(&self) -> Self {
        let tab = self.shared.next_tab.fetch_add(1, Ordering::Relaxed);
        Self { shared: Arc::clone(&self.shared), session: RwLock::default(), tab }
    }

    fn area(&self, scope: Scope) -> &Area {
        match scope {
            Scope::Session => &self.session,
            Scope::Durable => &self.shared.durable,
        }
    }

    fn announce(&self, scope: Scope, key: &str, value: Option<String>) {
        if scope == Scope::Durable {
            let _ = self.shared.changes.send(StorageChange { scope, key: key.to_string(), value, origin: self.tab });
        }
    }
}

impl KeyValueStore for MemoryStorage {
    fn tab_id(&self) -> u64 { self.tab }

    fn get(&self, scope: Scope, key: &str) -> Option<String> {
        let area = self.area(scope).read().unwrap_or_else(|poisoned| poisoned.into_inner());
        area.get(key).cloned()
    }

    fn set(&self, scope: Scope, key: &str, value: String) {
        self.area(scope)
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.clone());
        self.announce(scope, key, Some(value));
    }

    fn remove(&self, scope: Scope, key: &str) {
        let removed = self
            .area(scope)
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
            .is_some();
        if removed {
            self.announce(scope, key, None);
        }
    }

    fn changes(&self) -> broadcast::Receiver<StorageChange> { self.shared.changes.subscribe() }
}
