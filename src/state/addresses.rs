//! Address book.

use tracing::{info, instrument};
use validator::Validate;

use super::{NoticeKind, Storefront};
use crate::domain::aggregates::address::set_default;
use crate::domain::aggregates::{Address, AddressForm};
use crate::{new_id, Result, StorefrontError};

impl Storefront {
    /// Addresses that belong to the current user.
    pub fn my_addresses(&self) -> Vec<Address> {
        let Ok(user) = self.require_user() else { return Vec::new() };
        self.state.addresses.borrow().iter().filter(|a| a.user_id == user.id).cloned().collect()
    }

    fn owned_address(&self, id: &str) -> Result<Address> {
        self.my_addresses()
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| StorefrontError::AddressNotFound(id.to_string()))
    }

    /// Makes `default_id` the user's only default and persists every flag
    /// that flipped.
    fn make_default(&self, user_id: &str, default_id: &str) {
        let mut changed = Vec::new();
        self.state.addresses.send_if_modified(|book| {
            changed = set_default(book, user_id, default_id);
            !changed.is_empty()
        });
        for address in &changed {
            self.persist(address);
        }
    }

    /// The user's first address becomes the default regardless of the form.
    #[instrument(skip(self, form))]
    pub fn add_address(&self, form: AddressForm) -> Result<Address> {
        let user = self.require_user()?;
        form.validate()?;
        let first = self.my_addresses().is_empty();
        let mut address = form.into_address(new_id(), user.id.clone());
        let make_default = first || address.is_default;
        address.is_default = false;

        self.upsert(&self.state.addresses, address.clone());
        if make_default {
            self.make_default(&user.id, &address.id);
            address.is_default = true;
        }
        if self.state.selected_address.borrow().is_none() || make_default {
            self.state.selected_address.send_replace(Some(address.id.clone()));
        }
        self.notify(NoticeKind::Success, "Address saved");
        info!(address_id = %address.id, "address added");
        Ok(address)
    }

    #[instrument(skip(self, form))]
    pub fn update_address(&self, id: &str, form: AddressForm) -> Result<Address> {
        let existing = self.owned_address(id)?;
        form.validate()?;
        let wants_default = form.make_default;
        let mut address = form.into_address(existing.id.clone(), existing.user_id.clone());
        address.is_default = existing.is_default;
        self.upsert(&self.state.addresses, address.clone());
        if wants_default && !existing.is_default {
            self.make_default(&address.user_id, &address.id);
            address.is_default = true;
        }
        Ok(address)
    }

    /// Deleting the default promotes the next remaining address.
    #[instrument(skip(self))]
    pub fn delete_address(&self, id: &str) -> Result<()> {
        let existing = self.owned_address(id)?;
        self.remove(&self.state.addresses, id)?;
        let next = self.my_addresses().into_iter().next();
        if existing.is_default {
            if let Some(next) = &next {
                self.make_default(&existing.user_id, &next.id);
            }
        }
        self.state.selected_address.send_if_modified(|selected| {
            if selected.as_deref() != Some(id) {
                return false;
            }
            *selected = next.map(|a| a.id);
            true
        });
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_default_address(&self, id: &str) -> Result<()> {
        let address = self.owned_address(id)?;
        self.make_default(&address.user_id, &address.id);
        Ok(())
    }

    /// Chooses the delivery address for checkout.
    pub fn select_address(&self, id: &str) -> Result<()> {
        let address = self.owned_address(id)?;
        self.state.selected_address.send_replace(Some(address.id));
        Ok(())
    }

    /// The selected address, else the user's default.
    pub(super) fn delivery_address(&self) -> Option<Address> {
        let book = self.my_addresses();
        let selected = self.state.selected_address.borrow().clone();
        selected
            .and_then(|id| book.iter().find(|a| a.id == id).cloned())
            .or_else(|| book.into_iter().find(|a| a.is_default))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn defaults(h: &Harness) -> usize {
        h.store.my_addresses().iter().filter(|a| a.is_default).count()
    }

    #[tokio::test]
    async fn test_first_address_is_default() {
        let h = harness().await;
        let (_, first) = h.shopper_with_address("asha@mail.in").await;
        assert!(first.is_default);
        let second = h.store.add_address(address_form()).unwrap();
        assert!(!second.is_default);
        assert_eq!(defaults(&h), 1);
        assert_eq!(*h.store.state().selected_address().borrow(), Some(first.id));
    }

    #[tokio::test]
    async fn test_at_most_one_default() {
        let h = harness().await;
        let (_, first) = h.shopper_with_address("asha@mail.in").await;
        let second = h.store.add_address(AddressForm { make_default: true, ..address_form() }).unwrap();
        assert!(second.is_default);
        assert_eq!(defaults(&h), 1);
        h.store.set_default_address(&first.id).unwrap();
        assert_eq!(defaults(&h), 1);
        assert!(h.store.my_addresses().iter().find(|a| a.id == first.id).unwrap().is_default);
    }

    #[tokio::test]
    async fn test_deleting_default_promotes_next() {
        let h = harness().await;
        let (_, first) = h.shopper_with_address("asha@mail.in").await;
        let second = h.store.add_address(address_form()).unwrap();
        h.store.delete_address(&first.id).unwrap();
        let book = h.store.my_addresses();
        assert_eq!(book.len(), 1);
        assert!(book[0].is_default);
        assert_eq!(*h.store.state().selected_address().borrow(), Some(second.id));
    }

    #[tokio::test]
    async fn test_addresses_are_private() {
        let h = harness().await;
        let (_, mine) = h.shopper_with_address("asha@mail.in").await;
        h.store.logout().await.unwrap();
        h.shopper("other@mail.in").await;
        assert!(h.store.my_addresses().is_empty());
        assert!(matches!(h.store.select_address(&mine.id), Err(StorefrontError::AddressNotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_pincode_is_rejected() {
        let h = harness().await;
        h.shopper("asha@mail.in").await;
        let form = AddressForm { pincode: "012345".into(), ..address_form() };
        assert!(matches!(h.store.add_address(form), Err(StorefrontError::Validation(_))));
        assert!(h.store.my_addresses().is_empty());
    }
}
