//! User Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::{Validate, ValidationError};

use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Consumer,
    Business,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub wallet_balance: Money,
    #[serde(default)]
    pub blacklisted: bool,
    #[serde(default)]
    pub account_type: AccountType,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub referred_by: Option<String>,
    #[serde(default)]
    pub wishlist: BTreeSet<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_business(&self) -> bool { self.account_type == AccountType::Business }

    pub fn email_matches(&self, email: &str) -> bool {
        self.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email))
    }

    pub fn credit(&mut self, amount: Money) {
        self.wallet_balance = self.wallet_balance + amount;
    }

    /// Debits the wallet; the balance never goes negative.
    pub fn debit(&mut self, amount: Money) -> Result<(), WalletError> {
        if amount > self.wallet_balance {
            return Err(WalletError::InsufficientBalance { balance: self.wallet_balance, required: amount });
        }
        self.wallet_balance = self.wallet_balance - amount;
        Ok(())
    }

    /// Adds the product to the wishlist, or removes it if already present.
    /// Returns whether the product is now wishlisted.
    pub fn toggle_wishlist(&mut self, product_id: &str) -> bool {
        if self.wishlist.remove(product_id) {
            false
        } else {
            self.wishlist.insert(product_id.to_string());
            true
        }
    }
}

/// Referral code derived from the display name plus a slice of the id.
pub fn referral_code_for(name: &str, id: &str) -> String {
    let prefix: String = name
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(4)
        .collect::<String>()
        .to_uppercase();
    let suffix: String = id
        .chars()
        .rev()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(4)
        .collect::<String>()
        .to_uppercase();
    format!("{}{}", if prefix.is_empty() { "USER" } else { &prefix }, suffix)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("Insufficient wallet balance: {balance} available, {required} required")]
    InsufficientBalance { balance: Money, required: Money },
}

/// Profile edit form.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ProfileForm {
    #[validate(length(min = 2, max = 80))]
    pub name: String,
    #[validate(custom = "validate_mobile")]
    pub mobile: Option<String>,
}

/// Ten-digit Indian mobile number starting 6-9.
pub(crate) fn validate_mobile(mobile: &str) -> Result<(), ValidationError> {
    let ok = mobile.len() == 10
        && mobile.chars().all(|c| c.is_ascii_digit())
        && mobile.starts_with(['6', '7', '8', '9']);
    if ok { Ok(()) } else { Err(ValidationError::new("mobile")) }
}
