//! Address book entries.
//!
//! A user has at most one default address, and their first address becomes
//! the default automatically.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::aggregates::user::validate_mobile;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub mobile: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub landmark: Option<String>,
    pub pincode: String,
    pub locality: String,
    pub city: String,
    pub state: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddressForm {
    #[validate(length(min = 2, max = 80))]
    pub name: String,
    #[validate(custom = "validate_mobile")]
    pub mobile: String,
    #[validate(length(min = 3, max = 200))]
    pub line1: String,
    pub line2: Option<String>,
    pub landmark: Option<String>,
    #[validate(custom = "validate_pincode")]
    pub pincode: String,
    #[validate(length(min = 2, max = 100))]
    pub locality: String,
    #[validate(length(min = 2, max = 100))]
    pub city: String,
    #[validate(length(min = 2, max = 100))]
    pub state: String,
    #[serde(default)]
    pub make_default: bool,
}

impl AddressForm {
    pub fn into_address(self, id: String, user_id: String) -> Address {
        Address {
            id,
            user_id,
            name: self.name.trim().to_string(),
            mobile: self.mobile,
            line1: self.line1.trim().to_string(),
            line2: self.line2.filter(|s| !s.trim().is_empty()),
            landmark: self.landmark.filter(|s| !s.trim().is_empty()),
            pincode: self.pincode,
            locality: self.locality.trim().to_string(),
            city: self.city.trim().to_string(),
            state: self.state.trim().to_string(),
            is_default: self.make_default,
        }
    }
}

/// Six-digit postal code, first digit non-zero.
fn validate_pincode(pincode: &str) -> Result<(), ValidationError> {
    let ok = pincode.len() == 6
        && pincode.chars().all(|c| c.is_ascii_digit())
        && !pincode.starts_with('0');
    if ok { Ok(()) } else { Err(ValidationError::new("pincode")) }
}

/// Marks `default_id` as the only default among `user_id`'s addresses.
/// Returns the addresses whose flag changed.
pub fn set_default(addresses: &mut [Address], user_id: &str, default_id: &str) -> Vec<Address> {
    let mut changed = Vec::new();
    for a in addresses.iter_mut().filter(|a| a.user_id == user_id) {
        let should_be_default = a.id == default_id;
        if a.is_default != should_be_default {
            a.is_default = should_be_default;
            changed.push(a.clone());
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(id: &str, user: &str, is_default: bool) -> Address {
        Address { id: id.into(), user_id: user.into(), is_default, ..Address::default() }
    }

    #[test]
    fn test_set_default_is_exclusive_per_user() {
        let mut book = vec![address("A1", "U1", true), address("A2", "U1", false), address("B1", "U2", true)];
        let changed = set_default(&mut book, "U1", "A2");
        assert_eq!(changed.len(), 2);
        assert!(!book[0].is_default);
        assert!(book[1].is_default);
        assert!(book[2].is_default);
    }

    #[test]
    fn test_pincode_validation() {
        assert!(validate_pincode("560001").is_ok());
        assert!(validate_pincode("060001").is_err());
        assert!(validate_pincode("5600").is_err());
    }

    #[test]
    fn test_form_validation() {
        let form = AddressForm {
            name: "A".into(),
            mobile: "12345".into(),
            line1: "12 MG Road".into(),
            line2: None,
            landmark: None,
            pincode: "560001".into(),
            locality: "Ashok Nagar".into(),
            city: "Bengaluru".into(),
            state: "Karnataka".into(),
            make_default: false,
        };
        let errors = form.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("mobile"));
        assert!(!fields.contains_key("pincode"));
    }
}
