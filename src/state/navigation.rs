//! View routing with an auth guard.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{NoticeKind, Storefront};
use crate::{Result, StorefrontError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum View {
    #[default]
    Home,
    Shop,
    Product,
    Search,
    Compare,
    Cart,
    Checkout,
    OrderConfirmation,
    Orders,
    Account,
    Addresses,
    Wishlist,
    Wallet,
    Referrals,
    Faq,
    Login,
    Admin,
    NotFound,
}

/// Path segment and guard for every view.
const ROUTES: &[(View, &str, Guard)] = &[
    (View::Home, "home", Guard::Open),
    (View::Shop, "shop", Guard::Open),
    (View::Product, "product", Guard::Open),
    (View::Search, "search", Guard::Open),
    (View::Compare, "compare", Guard::Open),
    (View::Cart, "cart", Guard::Open),
    (View::Checkout, "checkout", Guard::SignedIn),
    (View::OrderConfirmation, "order-confirmation", Guard::SignedIn),
    (View::Orders, "orders", Guard::SignedIn),
    (View::Account, "account", Guard::SignedIn),
    (View::Addresses, "addresses", Guard::SignedIn),
    (View::Wishlist, "wishlist", Guard::SignedIn),
    (View::Wallet, "wallet", Guard::SignedIn),
    (View::Referrals, "referrals", Guard::SignedIn),
    (View::Faq, "faq", Guard::Open),
    (View::Login, "login", Guard::Open),
    (View::Admin, "admin", Guard::Admin),
    (View::NotFound, "not-found", Guard::Open),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Guard {
    Open,
    SignedIn,
    Admin,
}

impl View {
    /// Unknown paths map to [`View::NotFound`]; the empty path is home.
    pub fn from_path(path: &str) -> View {
        let segment = path.trim().trim_matches('/').split('/').next().unwrap_or_default();
        if segment.is_empty() {
            return View::Home;
        }
        ROUTES
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(segment))
            .map(|(view, _, _)| *view)
            .unwrap_or(View::NotFound)
    }

    pub fn path(self) -> &'static str {
        ROUTES.iter().find(|(v, _, _)| *v == self).map(|(_, name, _)| *name).unwrap_or("not-found")
    }

    fn guard(self) -> Guard {
        ROUTES.iter().find(|(v, _, _)| *v == self).map(|(_, _, g)| *g).unwrap_or(Guard::Open)
    }

    pub fn is_protected(self) -> bool { self.guard() == Guard::SignedIn }

    pub fn requires_admin(self) -> bool { self.guard() == Guard::Admin }
}

impl Storefront {
    /// Moves to `target`, applying the guard. A protected view while signed
    /// out lands on [`View::Login`] and remembers `target`; the admin view
    /// without admin rights is refused and the view does not change.
    /// Returns the view actually shown.
    #[instrument(skip(self))]
    pub fn navigate(&self, target: View) -> Result<View> {
        let auth = self.auth_flags();
        if target.requires_admin() && !auth.is_admin {
            self.notify(NoticeKind::Error, "You do not have access to the admin area");
            return Err(StorefrontError::NotAuthorized);
        }
        if target.is_protected() && !auth.is_authenticated {
            debug!(?target, "redirecting to login");
            self.state.pending_view.send_replace(Some(target));
            self.state.view.send_replace(View::Login);
            return Ok(View::Login);
        }
        self.state.view.send_if_modified(|view| {
            let changed = *view != target;
            *view = target;
            changed
        });
        Ok(target)
    }

    pub fn navigate_to_path(&self, path: &str) -> Result<View> {
        self.navigate(View::from_path(path))
    }

    /// After a successful sign-in: return to the view that triggered the
    /// login, or home.
    pub fn complete_login(&self) -> View {
        let target = self.state.pending_view.send_replace(None).unwrap_or(View::Home);
        self.navigate(target).unwrap_or_else(|_| {
            self.state.view.send_replace(View::Home);
            View::Home
        })
    }
}
