//! Read-side aggregates: referral standings and order statistics.

use serde::Serialize;
use std::collections::HashMap;

use super::Storefront;
use crate::domain::aggregates::{OrderStatus, ReturnStatus, Transaction, TransactionCategory, TransactionKind, User};
use crate::domain::value_objects::Money;
use crate::Result;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferrerStats {
    pub referrer_id: String,
    pub name: String,
    pub referral_code: Option<String>,
    pub referred_count: usize,
    pub commission: Money,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub total_orders: usize,
    /// Sum of totals over orders that were not cancelled.
    pub revenue: Money,
    pub confirmed: usize,
    pub shipped: usize,
    pub delivered: usize,
    pub cancelled: usize,
    pub pending_verification: usize,
    pub open_returns: usize,
}

fn is_commission(t: &Transaction) -> bool {
    t.kind == TransactionKind::Credit && t.category == TransactionCategory::ReferralCommission
}

fn referrer_stats(referrer: &User, users: &[User], transactions: &[Transaction]) -> ReferrerStats {
    ReferrerStats {
        referrer_id: referrer.id.clone(),
        name: referrer.name.clone(),
        referral_code: referrer.referral_code.clone(),
        referred_count: users.iter().filter(|u| u.referred_by.as_deref() == Some(referrer.id.as_str())).count(),
        commission: transactions.iter().filter(|t| t.user_id == referrer.id && is_commission(t)).map(|t| t.amount).sum(),
    }
}

/// Referrers ranked by commission earned, highest first. Ties keep the
/// larger referral count ahead.
pub(crate) fn rank_referrers(users: &[User], transactions: &[Transaction], n: usize) -> Vec<ReferrerStats> {
    let mut referred: HashMap<&str, usize> = HashMap::new();
    for referrer_id in users.iter().filter_map(|u| u.referred_by.as_deref()) {
        *referred.entry(referrer_id).or_default() += 1;
    }
    let mut ranked: Vec<ReferrerStats> = users
        .iter()
        .filter(|u| referred.contains_key(u.id.as_str()))
        .map(|u| referrer_stats(u, users, transactions))
        .collect();
    ranked.sort_by(|a, b| b.commission.cmp(&a.commission).then(b.referred_count.cmp(&a.referred_count)));
    ranked.truncate(n);
    ranked
}

impl Storefront {
    /// The `n` referrers who earned the most commission.
    pub fn top_referrers(&self, n: usize) -> Result<Vec<ReferrerStats>> {
        self.require_admin()?;
        let users = self.state.users.borrow();
        let transactions = self.state.transactions.borrow();
        Ok(rank_referrers(&users, &transactions, n))
    }

    pub fn order_stats(&self) -> Result<OrderStats> {
        self.require_admin()?;
        let orders = self.state.orders.borrow();
        let mut stats = OrderStats { total_orders: orders.len(), ..OrderStats::default() };
        for order in orders.iter() {
            match order.status {
                OrderStatus::Confirmed => stats.confirmed += 1,
                OrderStatus::Shipped => stats.shipped += 1,
                OrderStatus::Delivered => stats.delivered += 1,
                OrderStatus::Cancelled => stats.cancelled += 1,
                OrderStatus::PendingVerification => stats.pending_verification += 1,
            }
            if order.status != OrderStatus::Cancelled {
                stats.revenue = stats.revenue + order.total;
            }
            stats.open_returns += order
                .items
                .iter()
                .filter(|line| line.return_request.as_ref().is_some_and(|r| r.status == ReturnStatus::Pending))
                .count();
        }
        Ok(stats)
    }

    /// The signed-in user's own referral standing.
    pub fn my_referrals(&self) -> Result<ReferrerStats> {
        let user = self.require_user()?;
        let users = self.state.users.borrow();
        let transactions = self.state.transactions.borrow();
        Ok(referrer_stats(&user, &users, &transactions))
    }

    /// The signed-in user's wallet history, newest first.
    pub fn my_transactions(&self) -> Vec<Transaction> {
        let Ok(user) = self.require_user() else { return Vec::new() };
        self.state.transactions.borrow().iter().filter(|t| t.user_id == user.id).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::StorefrontError;
    use chrono::Utc;

    fn user(id: &str, referred_by: Option<&str>) -> User {
        let mut user: User = serde_json::from_value(serde_json::json!({ "id": id, "name": id.to_uppercase() })).unwrap();
        user.referred_by = referred_by.map(str::to_string);
        user
    }

    fn commission(user_id: &str, amount: i64) -> Transaction {
        Transaction {
            id: crate::new_id(),
            user_id: user_id.into(),
            kind: TransactionKind::Credit,
            category: TransactionCategory::ReferralCommission,
            amount: Money::from_major(amount),
            description: "commission".into(),
            order_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_rank_referrers_by_commission() {
        let users = vec![
            user("a", None),
            user("b", None),
            user("c", None),
            user("x", Some("a")),
            user("y", Some("b")),
            user("z", Some("b")),
        ];
        let mut refund = commission("a", 999);
        refund.category = TransactionCategory::Refund;
        let transactions = vec![commission("a", 50), commission("b", 30), commission("a", 25), refund, commission("c", 500)];

        let ranked = rank_referrers(&users, &transactions, 5);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].referrer_id, "a");
        assert_eq!(ranked[0].commission, Money::from_major(75));
        assert_eq!(ranked[0].referred_count, 1);
        assert_eq!(ranked[1].referrer_id, "b");
        assert_eq!(ranked[1].referred_count, 2);

        assert_eq!(rank_referrers(&users, &transactions, 1).len(), 1);
        assert!(rank_referrers(&users, &transactions, 0).is_empty());
    }

    #[tokio::test]
    async fn test_order_stats() {
        let h = harness().await;
        let shopper = h.shopper("asha@mail.in").await;
        h.seed_order(&sample_order("O-1", &shopper.id)).await;
        let mut cancelled = sample_order("O-2", &shopper.id);
        cancelled.set_status(OrderStatus::Cancelled, Utc::now()).unwrap();
        h.seed_order(&cancelled).await;
        h.seed_order(&delivered_order("O-3", &shopper.id)).await;
        assert!(matches!(h.store.order_stats(), Err(StorefrontError::NotAuthorized)));
        h.store.logout().await.unwrap();

        h.admin().await;
        let stats = h.store.order_stats().unwrap();
        assert_eq!(stats.total_orders, 3);
        assert_eq!(stats.revenue, Money::from_major(1200));
        assert_eq!((stats.confirmed, stats.cancelled, stats.delivered), (1, 1, 1));
        assert_eq!(stats.open_returns, 0);
        assert!(h.store.top_referrers(3).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_my_referrals_counts_referred_users() {
        let h = harness().await;
        let referrer = h.shopper("first@mail.in").await;
        h.store.logout().await.unwrap();
        h.shopper("second@mail.in").await;
        h.store.apply_referral_code(referrer.referral_code.as_deref().unwrap()).unwrap();
        h.store.logout().await.unwrap();

        h.store.login_with_email("first@mail.in", "secret-pass").await.unwrap();
        let mine = h.store.my_referrals().unwrap();
        assert_eq!(mine.referred_count, 1);
        assert_eq!(mine.commission, Money::ZERO);
        assert!(h.store.my_transactions().is_empty());
    }
}
