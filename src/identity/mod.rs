//! Sign-in provider contract.
//!
//! The provider owns the *session* (who is signed in); the state store maps
//! it onto a domain [`User`](crate::domain::aggregates::User).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

mod local;

pub use local::LocalIdentityProvider;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub phone: Option<String>,
    pub email_verified: bool,
    /// e.g. `password`, `google.com`, `phone`.
    pub provider_id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredential,

    #[error("This account has been disabled")]
    UserDisabled,

    #[error("Please verify your email before signing in")]
    EmailNotVerified,

    #[error("An account with this email already exists")]
    AlreadyInUse,

    #[error("The code you entered is incorrect")]
    InvalidOtp,

    #[error("Sign-in provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Reactive current session; `None` when signed out.
    fn session(&self) -> watch::Receiver<Option<Session>>;

    /// Federated sign-in through the provider's own consent flow.
    async fn sign_in_with_provider(&self) -> Result<Session, AuthError>;

    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_up_with_email(&self, name: &str, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn send_otp(&self, phone: &str) -> Result<(), AuthError>;

    async fn verify_otp(&self, phone: &str, code: &str) -> Result<Session, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}
