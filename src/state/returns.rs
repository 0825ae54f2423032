//! Per-line return requests and their review.

use chrono::Utc;
use tracing::{info, instrument};
use validator::Validate;

use super::{NoticeKind, Storefront};
use crate::domain::aggregates::{
    OrderError, RefundMethod, ReturnForm, ReturnRequest, ReturnStatus, ReturnType, TransactionCategory, TransactionKind,
};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::{Result, StorefrontError};

impl Storefront {
    /// Files a return for line `line` of a delivered order the current user
    /// placed. Each line takes one request.
    #[instrument(skip(self, form))]
    pub fn request_return(&self, order_id: &str, line: usize, form: ReturnForm) -> Result<ReturnRequest> {
        let user = self.require_user()?;
        form.validate()?;
        let mut order = self.find_order(order_id)?;
        if order.user_id != user.id {
            return Err(StorefrontError::OrderNotFound(order_id.to_string()));
        }
        order.request_return(line, form, Utc::now()).map_err(|e| self.fail(e.into()))?;
        let request = order.line(line)?.return_request.clone().ok_or(OrderError::NoReturnRequest)?;
        self.save_order(order);

        self.events.publish(DomainEvent::Order(OrderEvent::ReturnRequested { order_id: order_id.to_string(), line }));
        self.notify(NoticeKind::Success, "Return requested");
        info!(order_id, line, "return requested");
        Ok(request)
    }

    /// Approves or rejects a pending return. Decisions are final, so an
    /// approved wallet refund is credited exactly once. The order is left
    /// untouched when the wallet to credit cannot be found.
    #[instrument(skip(self))]
    pub async fn decide_return(&self, order_id: &str, line: usize, decision: ReturnStatus) -> Result<ReturnRequest> {
        self.require_admin()?;
        let mut order = self.find_order(order_id)?;
        let request = order.decide_return(line, decision, Utc::now()).map_err(|e| self.fail(e.into()))?.clone();
        let refund = order.line(line)?.line_total();
        let item = order.line(line)?.name.clone();
        let owner = order.user_id.clone();

        let wallet_refund = request.status == ReturnStatus::Approved
            && request.return_type == ReturnType::Refund
            && request.refund_method == RefundMethod::Wallet
            && refund.is_positive();
        if wallet_refund && self.load_user(&owner).await?.is_none() {
            return Err(self.fail(StorefrontError::UserNotFound(owner)));
        }
        self.save_order(order);

        if wallet_refund {
            self.post_wallet(
                &owner,
                TransactionKind::Credit,
                TransactionCategory::Refund,
                refund,
                format!("Refund for {item}"),
                Some(order_id),
            )?;
        }

        self.events.publish(DomainEvent::Order(OrderEvent::ReturnDecided {
            order_id: order_id.to_string(),
            line,
            status: request.status,
        }));
        info!(order_id, line, status = ?request.status, "return decided");
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::domain::aggregates::User;
    use crate::domain::value_objects::Money;
    use crate::gateway::{collections, DocumentGateway};

    fn wallet_refund_form() -> ReturnForm {
        ReturnForm {
            reason: "Too small".into(),
            comment: None,
            photo_url: None,
            return_type: ReturnType::Refund,
            refund_method: RefundMethod::Wallet,
        }
    }

    /// A shopper with one delivered order; leaves the admin signed in.
    async fn delivered(h: &Harness) -> String {
        let shopper = h.shopper("asha@mail.in").await;
        h.seed_order(&delivered_order("O-1", &shopper.id)).await;
        h.store.request_return("O-1", 0, wallet_refund_form()).unwrap();
        h.store.logout().await.unwrap();
        h.admin().await;
        shopper.id
    }

    fn wallet_of(h: &Harness, user_id: &str) -> Money {
        h.store.state().users().borrow().iter().find(|u| u.id == user_id).unwrap().wallet_balance
    }

    fn refunds(h: &Harness, user_id: &str) -> usize {
        h.store
            .state()
            .transactions()
            .borrow()
            .iter()
            .filter(|t| t.user_id == user_id && t.category == TransactionCategory::Refund)
            .count()
    }

    #[tokio::test]
    async fn test_approved_wallet_refund_credits_once() {
        let h = harness().await;
        let shopper = delivered(&h).await;

        let request = h.store.decide_return("O-1", 0, ReturnStatus::Approved).await.unwrap();
        assert_eq!(request.status, ReturnStatus::Approved);
        assert!(request.decided_at.is_some());
        assert_eq!(wallet_of(&h, &shopper), Money::from_major(600));
        assert_eq!(refunds(&h, &shopper), 1);

        let again = h.store.decide_return("O-1", 0, ReturnStatus::Approved).await.unwrap_err();
        assert!(matches!(again, StorefrontError::Order(OrderError::ReturnAlreadyDecided)));
        let reopen = h.store.decide_return("O-1", 0, ReturnStatus::Pending).await.unwrap_err();
        assert!(matches!(reopen, StorefrontError::Order(OrderError::InvalidDecision)));
        assert_eq!(wallet_of(&h, &shopper), Money::from_major(600));
        assert_eq!(refunds(&h, &shopper), 1);
    }

    fn forget_locally(h: &Harness, user_id: &str) -> User {
        let user = h.store.find_user(user_id).unwrap();
        h.store.state.users.send_modify(|users| users.retain(|u| u.id != user_id));
        user
    }

    fn pending_status(h: &Harness) -> ReturnStatus {
        h.store.find_order("O-1").unwrap().items[0].return_request.as_ref().unwrap().status
    }

    #[tokio::test]
    async fn test_wallet_refund_finds_owner_in_backend() {
        let h = harness().await;
        let shopper = delivered(&h).await;
        h.store.flush_writes().await;
        forget_locally(&h, &shopper);

        h.store.decide_return("O-1", 0, ReturnStatus::Approved).await.unwrap();
        assert_eq!(wallet_of(&h, &shopper), Money::from_major(600));
        assert_eq!(refunds(&h, &shopper), 1);
    }

    #[tokio::test]
    async fn test_unknown_owner_leaves_return_pending() {
        let h = harness().await;
        let shopper = delivered(&h).await;
        h.store.flush_writes().await;
        let owner = forget_locally(&h, &shopper);
        h.gateway.delete_document(collections::USERS, &shopper).await.unwrap();

        let err = h.store.decide_return("O-1", 0, ReturnStatus::Approved).await.unwrap_err();
        assert!(matches!(err, StorefrontError::UserNotFound(ref id) if *id == shopper));
        assert_eq!(pending_status(&h), ReturnStatus::Pending);
        assert_eq!(refunds(&h, &shopper), 0);

        h.gateway.insert(collections::USERS, &owner.id, &owner).await.unwrap();
        h.store.decide_return("O-1", 0, ReturnStatus::Approved).await.unwrap();
        assert_eq!(pending_status(&h), ReturnStatus::Approved);
        assert_eq!(wallet_of(&h, &shopper), Money::from_major(600));
        assert_eq!(refunds(&h, &shopper), 1);
    }

    #[tokio::test]
    async fn test_rejection_credits_nothing() {
        let h = harness().await;
        let shopper = delivered(&h).await;
        h.store.decide_return("O-1", 0, ReturnStatus::Rejected).await.unwrap();
        assert_eq!(wallet_of(&h, &shopper), Money::ZERO);
        assert_eq!(refunds(&h, &shopper), 0);
    }

    #[tokio::test]
    async fn test_return_rules() {
        let h = harness().await;
        let shopper = h.shopper("asha@mail.in").await;
        h.seed_order(&sample_order("O-open", &shopper.id)).await;
        h.seed_order(&delivered_order("O-done", &shopper.id)).await;

        let not_delivered = h.store.request_return("O-open", 0, wallet_refund_form()).unwrap_err();
        assert!(matches!(not_delivered, StorefrontError::Order(OrderError::NotDelivered)));
        let blank = ReturnForm { reason: "".into(), ..wallet_refund_form() };
        assert!(matches!(h.store.request_return("O-done", 0, blank), Err(StorefrontError::Validation(_))));

        h.store.request_return("O-done", 0, wallet_refund_form()).unwrap();
        let twice = h.store.request_return("O-done", 0, wallet_refund_form()).unwrap_err();
        assert!(matches!(twice, StorefrontError::Order(OrderError::ReturnAlreadyRequested)));
        assert!(matches!(h.store.decide_return("O-done", 0, ReturnStatus::Approved).await, Err(StorefrontError::NotAuthorized)));

        h.store.logout().await.unwrap();
        h.shopper("other@mail.in").await;
        assert!(matches!(
            h.store.request_return("O-done", 0, wallet_refund_form()),
            Err(StorefrontError::OrderNotFound(_))
        ));
    }
}
