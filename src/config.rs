//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `STOREFRONT_ADMIN_EMAILS` - Comma-separated admin allow-list
//! - `STOREFRONT_FREE_SHIPPING_THRESHOLD` - Subtotal that ships free (default: 499)
//! - `STOREFRONT_SHIPPING_FLAT_RATE` - Shipping charge below the threshold (default: 40)
//! - `STOREFRONT_RECENTLY_VIEWED_LIMIT` - Recently viewed ids kept (default: 10)
//! - `STOREFRONT_COMPARE_LIMIT` - Products in the comparison list (default: 4)
//! - `STOREFRONT_NOTICE_TTL_SECS` - Seconds a transient notice stays up (default: 3)
//! - `STOREFRONT_REFERRAL_COMMISSION_PERCENT` - Referrer's cut of a delivered order (default: 5)
//! - `DATABASE_URL` - PostgreSQL document store; in-memory when unset
//! - `NATS_URL` - Forward domain events to NATS when set

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::aggregates::ShippingSettings;
use crate::domain::value_objects::Money;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Lower-cased admin email addresses.
    pub admin_emails: BTreeSet<String>,
    /// Used until the backend's shipping settings load.
    pub shipping: ShippingSettings,
    pub recently_viewed_limit: usize,
    pub compare_limit: usize,
    pub notice_ttl: Duration,
    pub referral_commission_percent: Decimal,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            admin_emails: BTreeSet::new(),
            shipping: ShippingSettings::default(),
            recently_viewed_limit: 10,
            compare_limit: 4,
            notice_ttl: Duration::from_secs(3),
            referral_commission_percent: Decimal::from(5),
            database_url: None,
            nats_url: None,
        }
    }
}

impl StoreConfig {
    /// Reads configuration from the process environment (after `.env`).
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let num = |key: &'static str| get(key).map(|raw| (key, raw));

        let shipping = ShippingSettings {
            free_shipping_threshold: Money::new(parse_or(
                num("STOREFRONT_FREE_SHIPPING_THRESHOLD"),
                defaults.shipping.free_shipping_threshold.amount(),
            )?),
            flat_rate: Money::new(parse_or(num("STOREFRONT_SHIPPING_FLAT_RATE"), defaults.shipping.flat_rate.amount())?),
        };

        Ok(Self {
            admin_emails: get("STOREFRONT_ADMIN_EMAILS").map(|list| parse_admin_emails(&list)).unwrap_or_default(),
            shipping,
            recently_viewed_limit: parse_or(num("STOREFRONT_RECENTLY_VIEWED_LIMIT"), defaults.recently_viewed_limit)?,
            compare_limit: parse_or(num("STOREFRONT_COMPARE_LIMIT"), defaults.compare_limit)?,
            notice_ttl: Duration::from_secs(parse_or(num("STOREFRONT_NOTICE_TTL_SECS"), defaults.notice_ttl.as_secs())?),
            referral_commission_percent: parse_or(
                num("STOREFRONT_REFERRAL_COMMISSION_PERCENT"),
                defaults.referral_commission_percent,
            )?,
            database_url: get("DATABASE_URL"),
            nats_url: get("NATS_URL"),
        })
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails.contains(&email.trim().to_lowercase())
    }

    pub fn with_admin(mut self, email: &str) -> Self {
        self.admin_emails.insert(email.trim().to_lowercase());
        self
    }
}

fn parse_admin_emails(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn parse_or<T: FromStr>(value: Option<(&str, String)>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some((key, raw)) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> Result<StoreConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        StoreConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_map(&[]).unwrap();
        assert_eq!(config.shipping, ShippingSettings::default());
        assert_eq!(config.recently_viewed_limit, 10);
        assert!(config.admin_emails.is_empty());
        assert!(config.database_url.is_none());
        assert_eq!(config.referral_commission_percent, Decimal::from(5));
    }

    #[test]
    fn test_admin_list_is_normalized() {
        let config = from_map(&[("STOREFRONT_ADMIN_EMAILS", " Owner@Shop.in, ,ops@shop.in ")]).unwrap();
        assert!(config.is_admin_email("owner@shop.in"));
        assert!(config.is_admin_email("OPS@shop.in"));
        assert_eq!(config.admin_emails.len(), 2);
    }

    #[test]
    fn test_shipping_overrides() {
        let config = from_map(&[
            ("STOREFRONT_FREE_SHIPPING_THRESHOLD", "999"),
            ("STOREFRONT_SHIPPING_FLAT_RATE", "59.50"),
        ])
        .unwrap();
        assert_eq!(config.shipping.free_shipping_threshold, Money::from_major(999));
        assert_eq!(config.shipping.flat_rate, Money::new(Decimal::new(5950, 2)));
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = from_map(&[("STOREFRONT_COMPARE_LIMIT", "four")]).unwrap_err();
        assert!(err.to_string().contains("STOREFRONT_COMPARE_LIMIT"));
    }
}
