//! In-memory identity provider for offline runs and tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::info;

use super::{AuthError, IdentityProvider, Session};

struct Account {
    uid: String,
    name: String,
    email: String,
    password_digest: String,
    verified: bool,
    disabled: bool,
}

#[derive(Default)]
struct Directory {
    accounts: HashMap<String, Account>,
    pending_otps: HashMap<String, String>,
}

/// Email/password, phone OTP and a canned federated profile, all held in
/// memory. `latency` simulates a network round trip on every call.
pub struct LocalIdentityProvider {
    directory: Mutex<Directory>,
    session: watch::Sender<Option<Session>>,
    federated: Option<Session>,
    latency: Duration,
    require_verified_email: bool,
}

impl Default for LocalIdentityProvider {
    fn default() -> Self { Self::new() }
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);
        Self {
            directory: Mutex::new(Directory::default()),
            session,
            federated: None,
            latency: Duration::ZERO,
            require_verified_email: false,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Profile returned by [`IdentityProvider::sign_in_with_provider`].
    pub fn with_federated_profile(mut self, profile: Session) -> Self {
        self.federated = Some(profile);
        self
    }

    pub fn require_verified_email(mut self, required: bool) -> Self {
        self.require_verified_email = required;
        self
    }

    pub async fn mark_verified(&self, email: &str) {
        if let Some(account) = self.directory.lock().await.accounts.get_mut(&email.to_lowercase()) {
            account.verified = true;
        }
    }

    pub async fn set_disabled(&self, email: &str, disabled: bool) {
        if let Some(account) = self.directory.lock().await.accounts.get_mut(&email.to_lowercase()) {
            account.disabled = disabled;
        }
    }

    /// Last code issued to `phone`; stands in for reading the SMS.
    pub async fn issued_otp(&self, phone: &str) -> Option<String> {
        self.directory.lock().await.pending_otps.get(phone).cloned()
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn start_session(&self, session: Session) -> Session {
        info!(uid = %session.uid, provider = %session.provider_id, "session started");
        self.session.send_replace(Some(session.clone()));
        session
    }
}

fn digest(email: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn email_session(account: &Account) -> Session {
    Session {
        uid: account.uid.clone(),
        email: Some(account.email.clone()),
        display_name: Some(account.name.clone()),
        photo_url: None,
        phone: None,
        email_verified: account.verified,
        provider_id: "password".to_string(),
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn session(&self) -> watch::Receiver<Option<Session>> { self.session.subscribe() }

    async fn sign_in_with_provider(&self) -> Result<Session, AuthError> {
        self.round_trip().await;
        let profile = self
            .federated
            .clone()
            .ok_or_else(|| AuthError::Provider("no federated provider configured".to_string()))?;
        Ok(self.start_session(profile))
    }

    async fn sign_in_with_email(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.round_trip().await;
        let key = email.trim().to_lowercase();
        let session = {
            let directory = self.directory.lock().await;
            let account = directory.accounts.get(&key).ok_or(AuthError::InvalidCredential)?;
            if account.password_digest != digest(&key, password) {
                return Err(AuthError::InvalidCredential);
            }
            if account.disabled {
                return Err(AuthError::UserDisabled);
            }
            if self.require_verified_email && !account.verified {
                return Err(AuthError::EmailNotVerified);
            }
            email_session(account)
        };
        Ok(self.start_session(session))
    }

    async fn sign_up_with_email(&self, name: &str, email: &str, password: &str) -> Result<Session, AuthError> {
        self.round_trip().await;
        let key = email.trim().to_lowercase();
        let session = {
            let mut directory = self.directory.lock().await;
            if directory.accounts.contains_key(&key) {
                return Err(AuthError::AlreadyInUse);
            }
            let account = Account {
                uid: crate::new_id(),
                name: name.trim().to_string(),
                email: key.clone(),
                password_digest: digest(&key, password),
                verified: false,
                disabled: false,
            };
            let session = email_session(&account);
            directory.accounts.insert(key, account);
            session
        };
        if self.require_verified_email {
            // A fresh account waits for verification before its first session.
            return Err(AuthError::EmailNotVerified);
        }
        Ok(self.start_session(session))
    }

    async fn send_otp(&self, phone: &str) -> Result<(), AuthError> {
        self.round_trip().await;
        let bytes = uuid::Uuid::new_v4().into_bytes();
        let code = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % 1_000_000;
        self.directory.lock().await.pending_otps.insert(phone.to_string(), format!("{code:06}"));
        Ok(())
    }

    async fn verify_otp(&self, phone: &str, code: &str) -> Result<Session, AuthError> {
        self.round_trip().await;
        let mut directory = self.directory.lock().await;
        match directory.pending_otps.get(phone) {
            Some(expected) if expected == code.trim() => {
                directory.pending_otps.remove(phone);
            }
            _ => return Err(AuthError::InvalidOtp),
        }
        drop(directory);
        let session = Session {
            uid: format!("phone:{phone}"),
            email: None,
            display_name: None,
            photo_url: None,
            phone: Some(phone.to_string()),
            email_verified: false,
            provider_id: "phone".to_string(),
        };
        Ok(self.start_session(session))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.round_trip().await;
        self.session.send_replace(None);
        Ok(())
    }
}
