//! Sign-in flows and the signed-in shopper's own account.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use validator::{Validate, ValidationError};

use super::{NoticeKind, Storefront};
use crate::domain::aggregates::{ProfileForm, Review, ReviewForm, ThemeMode, User};
use crate::identity::{AuthError, Session};
use crate::storage::{keys, write_json, Scope};
use crate::{new_id, Result, StorefrontError};

impl Storefront {
    async fn finish_sign_in(&self, signed_in: std::result::Result<Session, AuthError>) -> Result<User> {
        let session = signed_in.map_err(|e| self.fail(e.into()))?;
        let user = self
            .handle_session_change(Some(session))
            .await?
            .ok_or(StorefrontError::NotAuthenticated)?;
        self.notify(NoticeKind::Success, format!("Welcome, {}", user.name));
        self.complete_login();
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn login_with_email(&self, email: &str, password: &str) -> Result<User> {
        let signed_in = self.identity.sign_in_with_email(email, password).await;
        self.finish_sign_in(signed_in).await
    }

    #[instrument(skip(self))]
    pub async fn login_with_provider(&self) -> Result<User> {
        let signed_in = self.identity.sign_in_with_provider().await;
        self.finish_sign_in(signed_in).await
    }

    #[instrument(skip(self, password))]
    pub async fn register_with_email(&self, name: &str, email: &str, password: &str) -> Result<User> {
        let signed_in = self.identity.sign_up_with_email(name, email, password).await;
        self.finish_sign_in(signed_in).await
    }

    #[instrument(skip(self))]
    pub async fn send_otp(&self, phone: &str) -> Result<()> {
        self.identity.send_otp(phone).await.map_err(|e| self.fail(e.into()))?;
        self.notify(NoticeKind::Info, "We sent a code to your phone");
        Ok(())
    }

    #[instrument(skip(self, code))]
    pub async fn verify_otp(&self, phone: &str, code: &str) -> Result<User> {
        let signed_in = self.identity.verify_otp(phone, code).await;
        self.finish_sign_in(signed_in).await
    }

    /// Signs out and drops everything tied to the shopper.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        self.identity.sign_out().await.map_err(|e| self.fail(e.into()))?;
        self.handle_session_change(None).await?;
        self.state.cart.send_replace(Default::default());
        self.state.applied_coupon.send_replace(None);
        self.state.selected_address.send_replace(None);
        self.state.pending_view.send_replace(None);
        self.refresh_derived();
        self.navigate(super::View::Home)?;
        Ok(())
    }

    #[instrument(skip(self, form))]
    pub fn update_profile(&self, form: ProfileForm) -> Result<User> {
        let mut user = self.require_user()?;
        form.validate()?;
        user.name = form.name.trim().to_string();
        user.mobile = form.mobile.filter(|m| !m.is_empty());
        self.save_user(user.clone());
        self.notify(NoticeKind::Success, "Profile updated");
        Ok(user)
    }

    /// Returns whether the product is wishlisted afterwards.
    #[instrument(skip(self))]
    pub fn toggle_wishlist(&self, product_id: &str) -> Result<bool> {
        let mut user = self.require_user()?;
        if self.catalog.get_by_id(product_id).is_none() {
            return Err(StorefrontError::ProductNotFound(product_id.to_string()));
        }
        let added = user.toggle_wishlist(product_id);
        self.save_user(user);
        Ok(added)
    }

    /// Links the current user to the owner of `code`. A user can be referred
    /// once and never by themselves.
    #[instrument(skip(self))]
    pub fn apply_referral_code(&self, code: &str) -> Result<User> {
        let mut user = self.require_user()?;
        if user.referred_by.is_some() {
            return Err(self.fail(StorefrontError::invalid_field("referralCode", ValidationError::new("already_referred"))));
        }
        let code = code.trim();
        let referrer = self
            .state
            .users
            .borrow()
            .iter()
            .find(|u| u.id != user.id && u.referral_code.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(code)))
            .map(|u| u.id.clone());
        let referrer = referrer.ok_or_else(|| self.fail(StorefrontError::InvalidReferralCode))?;
        user.referred_by = Some(referrer);
        self.save_user(user.clone());
        self.notify(NoticeKind::Success, "Referral code applied");
        Ok(user)
    }

    pub fn set_language(&self, language: &str) {
        let language = language.trim().to_string();
        self.storage.set(Scope::Durable, keys::LANGUAGE, language.clone());
        self.state.language.send_replace(language);
    }

    pub fn set_theme(&self, mode: ThemeMode) {
        write_json(self.storage.as_ref(), Scope::Durable, keys::THEME, &mode);
        self.state.theme_mode.send_replace(mode);
    }

    /// Stores a review and refreshes the product's average rating.
    #[instrument(skip(self, form))]
    pub fn add_review(&self, product_id: &str, form: ReviewForm) -> Result<Review> {
        let user = self.require_user()?;
        form.validate()?;
        if self.catalog.get_by_id(product_id).is_none() {
            return Err(StorefrontError::ProductNotFound(product_id.to_string()));
        }
        let review = Review {
            id: new_id(),
            product_id: product_id.to_string(),
            user_id: user.id,
            user_name: user.name,
            rating: form.rating,
            comment: form.comment.trim().to_string(),
            created_at: Utc::now(),
        };
        self.persist(&review);
        self.state.reviews.send_modify(|reviews| reviews.insert(0, review.clone()));

        let (sum, count) = self
            .state
            .reviews
            .borrow()
            .iter()
            .filter(|r| r.product_id == product_id)
            .fold((0u32, 0u32), |(sum, count), r| (sum + u32::from(r.rating), count + 1));
        let average = (Decimal::from(sum) / Decimal::from(count.max(1))).round_dp(1);
        self.catalog.apply_review_stats(product_id, average.to_f32().unwrap_or_default(), count);
        info!(product_id, rating = review.rating, "review added");
        Ok(review)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::identity::IdentityProvider;
    use crate::storage::KeyValueStore;

    #[tokio::test]
    async fn test_wrong_password_surfaces_auth_error() {
        let h = harness().await;
        h.shopper("asha@mail.in").await;
        h.store.logout().await.unwrap();
        let err = h.store.login_with_email("asha@mail.in", "nope").await.unwrap_err();
        assert!(matches!(err, StorefrontError::Auth(AuthError::InvalidCredential)));
        assert!(h.store.state().notice().borrow().as_ref().is_some_and(|n| n.kind == NoticeKind::Error));
        assert!(!h.store.auth_flags().is_authenticated);
    }

    #[tokio::test]
    async fn test_otp_sign_in() {
        let h = harness().await;
        h.store.send_otp("9876543210").await.unwrap();
        let code = h.identity.issued_otp("9876543210").await.unwrap();
        let user = h.store.verify_otp("9876543210", &code).await.unwrap();
        assert_eq!(user.mobile.as_deref(), Some("9876543210"));
        assert!(h.store.auth_flags().is_authenticated);
    }

    #[tokio::test]
    async fn test_logout_clears_shopper_state() {
        let h = harness().await;
        let p = h.product("Shirt", 500, 800);
        h.shopper("asha@mail.in").await;
        h.store.add_to_cart(&p.id, "M", 1, None).unwrap();
        h.store.logout().await.unwrap();
        assert!(h.store.state().cart().borrow().is_empty());
        assert!(h.store.current_user().is_none());
        assert!(h.identity.session().borrow().is_none());
    }

    #[tokio::test]
    async fn test_profile_validation() {
        let h = harness().await;
        h.shopper("asha@mail.in").await;
        let bad = ProfileForm { name: "Asha".into(), mobile: Some("12345".into()) };
        assert!(matches!(h.store.update_profile(bad), Err(StorefrontError::Validation(_))));
        let good = ProfileForm { name: " Asha R ".into(), mobile: Some("9123456789".into()) };
        let user = h.store.update_profile(good).unwrap();
        assert_eq!(user.name, "Asha R");
        assert_eq!(h.store.state().users().borrow().iter().find(|u| u.id == user.id).unwrap().name, "Asha R");
    }

    #[tokio::test]
    async fn test_wishlist_toggle() {
        let h = harness().await;
        let p = h.product("Shirt", 500, 800);
        h.shopper("asha@mail.in").await;
        assert!(h.store.toggle_wishlist(&p.id).unwrap());
        assert!(h.store.current_user().unwrap().wishlist.contains(&p.id));
        assert!(!h.store.toggle_wishlist(&p.id).unwrap());
        assert!(matches!(h.store.toggle_wishlist("ghost"), Err(StorefrontError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn test_referral_code_links_once() {
        let h = harness().await;
        let referrer = h.shopper("first@mail.in").await;
        h.store.logout().await.unwrap();
        let code = referrer.referral_code.clone().unwrap();

        h.shopper("second@mail.in").await;
        assert!(matches!(h.store.apply_referral_code("NOPE0000"), Err(StorefrontError::InvalidReferralCode)));
        let user = h.store.apply_referral_code(&code.to_lowercase()).unwrap();
        assert_eq!(user.referred_by.as_deref(), Some(referrer.id.as_str()));
        assert!(h.store.apply_referral_code(&code).is_err());
    }

    #[tokio::test]
    async fn test_preferences_are_durable() {
        let h = harness().await;
        h.store.set_language("ta");
        h.store.set_theme(ThemeMode::Dark);
        assert_eq!(h.storage.get(Scope::Durable, keys::LANGUAGE).as_deref(), Some("ta"));
        assert_eq!(h.storage.get(Scope::Durable, keys::THEME).as_deref(), Some("\"dark\""));
        assert_eq!(*h.store.state().theme_mode().borrow(), ThemeMode::Dark);
    }

    #[tokio::test]
    async fn test_reviews_update_product_rating() {
        let h = harness().await;
        let p = h.product("Shirt", 500, 800);
        h.shopper("asha@mail.in").await;
        h.store.add_review(&p.id, ReviewForm { rating: 5, comment: "Great".into() }).unwrap();
        h.store.add_review(&p.id, ReviewForm { rating: 4, comment: "".into() }).unwrap();
        let product = h.store.catalog().get_by_id(&p.id).unwrap();
        assert_eq!(product.reviews, 2);
        assert!((product.rating - 4.5).abs() < f32::EPSILON);
        assert!(h.store.add_review(&p.id, ReviewForm { rating: 6, comment: "".into() }).is_err());
    }
}
