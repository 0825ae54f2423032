//! Session-to-user resolution, authorization flags and impersonation.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

use super::{NoticeKind, Storefront};
use crate::domain::aggregates::user::referral_code_for;
use crate::domain::aggregates::{AccountType, User};
use crate::domain::events::{DomainEvent, UserEvent};
use crate::domain::value_objects::Money;
use crate::identity::{AuthError, Session};
use crate::storage::{keys, write_json, Scope};
use crate::{Result, StorefrontError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFlags {
    pub is_authenticated: bool,
    /// Allow-listed email and not impersonating.
    pub is_admin: bool,
    pub is_impersonating: bool,
    pub is_b2b: bool,
}

/// The admin's own session, parked while they act as another user.
#[derive(Clone, Debug, PartialEq)]
pub struct Impersonation {
    pub admin_session: Session,
    pub admin_user: Option<User>,
}

impl Storefront {
    pub(super) fn compute_auth(&self) -> AuthFlags {
        let session = self.state.session.borrow();
        let is_impersonating = self.state.impersonation.borrow().is_some();
        let email_is_admin = session
            .as_ref()
            .and_then(|s| s.email.as_deref())
            .is_some_and(|email| self.config.is_admin_email(email));
        AuthFlags {
            is_authenticated: session.is_some(),
            is_admin: email_is_admin && !is_impersonating,
            is_impersonating,
            is_b2b: self.state.current_user.borrow().as_ref().is_some_and(User::is_business),
        }
    }

    /// Maps an identity session onto a domain user, creating the user on
    /// first sign-in. `None` signs the store out. Blacklisted users are
    /// signed out again and rejected.
    #[instrument(skip(self, session), fields(uid = session.as_ref().map(|s| s.uid.as_str())))]
    pub async fn handle_session_change(&self, session: Option<Session>) -> Result<Option<User>> {
        let _guard = self.resolve_lock.lock().await;

        let parked = self.state.impersonation.borrow().clone();
        if let (Some(parked), Some(incoming)) = (&parked, &session) {
            if parked.admin_session.uid == incoming.uid {
                return Ok(self.current_user());
            }
        }

        let Some(session) = session else {
            self.clear_session();
            return Ok(None);
        };

        let unchanged = parked.is_none()
            && self.state.session.borrow().as_ref().is_some_and(|s| s.uid == session.uid);
        if unchanged {
            if let Some(user) = self.current_user() {
                return Ok(Some(user));
            }
        }

        let user = match self.resolve_user(&session).await {
            Some(user) => user,
            None => self.create_user_from(&session),
        };

        if user.blacklisted {
            warn!(user_id = %user.id, "blacklisted user signed in; signing out");
            if let Err(e) = self.identity.sign_out().await {
                warn!(error = %e, "sign-out after blacklist check failed");
            }
            self.clear_session();
            return Err(self.fail(AuthError::UserDisabled.into()));
        }

        self.state.impersonation.send_replace(None);
        self.state.session.send_replace(Some(session));
        write_json(self.storage.as_ref(), Scope::Session, keys::CURRENT_USER, &user);
        self.state.current_user.send_replace(Some(user.clone()));
        self.refresh_derived();
        info!(user_id = %user.id, "signed in");
        Ok(Some(user))
    }

    /// Admin sessions match by email, everyone else by session id. Falls back
    /// to the backend when the users collection has not loaded yet.
    async fn resolve_user(&self, session: &Session) -> Option<User> {
        let admin_email = session.email.as_deref().filter(|email| self.config.is_admin_email(email));
        let matches = |u: &User| match admin_email {
            Some(email) => u.email_matches(email) || u.id == session.uid,
            None => u.id == session.uid,
        };
        if let Some(user) = self.state.users.borrow().iter().find(|u| matches(u)).cloned() {
            return Some(user);
        }
        match self.load_user(&session.uid).await {
            Ok(user) => user,
            Err(e) => {
                warn!(uid = %session.uid, error = %e, "user lookup failed");
                None
            }
        }
    }

    fn create_user_from(&self, session: &Session) -> User {
        let name = session
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| session.email.as_deref().and_then(|e| e.split('@').next()).map(str::to_string))
            .or_else(|| session.phone.clone())
            .unwrap_or_else(|| "Customer".to_string());
        let user = User {
            referral_code: Some(referral_code_for(&name, &session.uid)),
            id: session.uid.clone(),
            name,
            email: session.email.clone(),
            mobile: session.phone.clone(),
            photo_url: session.photo_url.clone(),
            provider_id: Some(session.provider_id.clone()),
            verified: session.email_verified,
            wallet_balance: Money::ZERO,
            blacklisted: false,
            account_type: AccountType::Consumer,
            referred_by: None,
            wishlist: BTreeSet::new(),
            created_at: Utc::now(),
        };
        self.upsert(&self.state.users, user.clone());
        self.events.publish(DomainEvent::User(UserEvent::Created { user_id: user.id.clone() }));
        info!(user_id = %user.id, "created user for new session");
        user
    }

    fn clear_session(&self) {
        self.state.impersonation.send_replace(None);
        self.state.session.send_replace(None);
        self.state.current_user.send_replace(None);
        self.storage.remove(Scope::Session, keys::CURRENT_USER);
        self.refresh_derived();
    }

    /// Lets an admin act as `user_id`. The admin's session is parked and
    /// admin rights are off until [`stop_impersonating`](Self::stop_impersonating).
    #[instrument(skip(self))]
    pub fn impersonate(&self, user_id: &str) -> Result<User> {
        self.require_admin()?;
        let target = self.find_user(user_id).ok_or_else(|| StorefrontError::UserNotFound(user_id.to_string()))?;
        let admin_session = self.state.session.borrow().clone().ok_or(StorefrontError::NotAuthenticated)?;

        self.state.impersonation.send_replace(Some(Impersonation {
            admin_session,
            admin_user: self.current_user(),
        }));
        self.state.session.send_replace(Some(Session {
            uid: target.id.clone(),
            email: target.email.clone(),
            display_name: Some(target.name.clone()),
            photo_url: target.photo_url.clone(),
            phone: target.mobile.clone(),
            email_verified: target.verified,
            provider_id: "impersonation".to_string(),
        }));
        self.state.current_user.send_replace(Some(target.clone()));
        self.refresh_derived();
        self.notify(NoticeKind::Info, format!("Viewing the store as {}", target.name));
        info!(user_id = %target.id, "impersonation started");
        Ok(target)
    }

    /// Restores the parked admin session.
    #[instrument(skip(self))]
    pub fn stop_impersonating(&self) -> Result<()> {
        let parked = self.state.impersonation.send_replace(None).ok_or(StorefrontError::NotAuthorized)?;
        self.state.session.send_replace(Some(parked.admin_session));
        self.state.current_user.send_replace(parked.admin_user);
        self.refresh_derived();
        info!("impersonation ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::gateway::{collections, DocumentGateway};
    use crate::identity::IdentityProvider;
    use crate::storage::KeyValueStore;

    fn google_session(uid: &str) -> Session {
        Session {
            uid: uid.into(),
            email: Some("meera@gmail.com".into()),
            display_name: Some("Meera Iyer".into()),
            photo_url: Some("https://img/meera.png".into()),
            phone: None,
            email_verified: true,
            provider_id: "google.com".into(),
        }
    }

    #[tokio::test]
    async fn test_new_session_synthesizes_user_once() {
        let h = harness().await;
        let user = h.store.handle_session_change(Some(google_session("G1"))).await.unwrap().unwrap();
        assert_eq!(user.name, "Meera Iyer");
        assert_eq!(user.wallet_balance, Money::ZERO);
        assert_eq!(user.account_type, AccountType::Consumer);
        assert!(user.wishlist.is_empty());
        assert_eq!(user.provider_id.as_deref(), Some("google.com"));

        h.store.handle_session_change(None).await.unwrap();
        h.store.handle_session_change(Some(google_session("G1"))).await.unwrap();
        assert_eq!(h.store.state().users().borrow().iter().filter(|u| u.id == "G1").count(), 1);

        h.store.flush_writes().await;
        assert!(h.gateway.get_document(collections::USERS, "G1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_session_user_is_kept_in_session_storage() {
        let h = harness().await;
        h.store.handle_session_change(Some(google_session("G1"))).await.unwrap();
        assert!(h.storage.get(Scope::Session, keys::CURRENT_USER).is_some());
        h.store.logout().await.unwrap();
        assert!(h.storage.get(Scope::Session, keys::CURRENT_USER).is_none());
        assert!(!h.store.auth_flags().is_authenticated);
    }

    #[tokio::test]
    async fn test_admin_matches_existing_record_by_email() {
        let h = harness().await;
        let mut existing: User = serde_json::from_value(serde_json::json!({
            "id": "legacy-admin", "name": "Owner", "email": ADMIN_EMAIL
        }))
        .unwrap();
        existing.wallet_balance = Money::from_major(10);
        h.gateway.insert(collections::USERS, "legacy-admin", &existing).await.unwrap();
        h.store.load_all().await;

        let admin = h.admin().await;
        assert_eq!(admin.id, "legacy-admin");
        assert!(h.store.auth_flags().is_admin);
    }

    #[tokio::test]
    async fn test_blacklisted_user_is_rejected() {
        let h = harness().await;
        let user = h.shopper("asha@mail.in").await;
        h.store.logout().await.unwrap();
        h.admin().await;
        h.store.set_blacklisted(&user.id, true).unwrap();
        h.store.logout().await.unwrap();

        let err = h.store.login_with_email("asha@mail.in", "secret-pass").await.unwrap_err();
        assert!(matches!(err, StorefrontError::Auth(AuthError::UserDisabled)));
        assert!(h.store.current_user().is_none());
        assert!(h.identity.session().borrow().is_none());
    }

    #[tokio::test]
    async fn test_impersonation_hides_admin_and_restores() {
        let h = harness().await;
        let shopper = h.shopper("asha@mail.in").await;
        h.store.logout().await.unwrap();
        let admin = h.admin().await;

        let viewed = h.store.impersonate(&shopper.id).unwrap();
        assert_eq!(viewed.id, shopper.id);
        let flags = h.store.auth_flags();
        assert!(flags.is_impersonating);
        assert!(!flags.is_admin);
        assert!(matches!(h.store.navigate(super::super::View::Admin), Err(StorefrontError::NotAuthorized)));
        assert!(matches!(h.store.impersonate(&admin.id), Err(StorefrontError::NotAuthorized)));

        h.store.stop_impersonating().unwrap();
        assert_eq!(h.store.current_user().unwrap().id, admin.id);
        assert!(h.store.auth_flags().is_admin);
    }

    #[tokio::test]
    async fn test_session_sync_follows_identity_provider() {
        let h = harness().await;
        h.store.start().await.unwrap();
        let mut flags = h.store.state().auth();
        h.identity.sign_up_with_email("Ravi", "ravi@mail.in", "pw").await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), flags.wait_for(|f| f.is_authenticated))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.store.current_user().unwrap().email.as_deref(), Some("ravi@mail.in"));
        h.store.shutdown().await;
    }
}
