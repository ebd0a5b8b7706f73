//! Subscription and package types
//!
//! A subscription is the credit-bearing entitlement a client spends against.
//! Packages are the admin-owned catalog entries subscriptions are minted
//! from; the core reads them but never mutates them.

use crate::ids::{PackageId, SubscriptionId, UserId};
use crate::Credits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A credit package offered for purchase.
///
/// Owned by admin CRUD outside the core. `max_free_revisions` and
/// `paid_revision_unit_cost` drive the revision quota on requests paid for
/// out of a subscription to this package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub name: String,
    /// Credit allowance granted on purchase
    pub credits: Credits,
    /// Subscription lifetime in days
    pub duration_days: i64,
    /// Revisions included per request before surcharges apply
    pub max_free_revisions: u32,
    /// Surcharge per revision past the free quota
    pub paid_revision_unit_cost: Credits,
    /// Granted automatically at registration when true
    pub is_free: bool,
    pub is_active: bool,
}

/// A user's credit-bearing subscription.
///
/// Invariant: `remaining_credits` never goes negative. The row is never
/// hard-deleted; lapse and cancellation only flip `is_active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub package_id: PackageId,
    pub remaining_credits: Credits,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Mint a subscription from a package.
    pub fn from_package(user_id: UserId, package: &Package, now: DateTime<Utc>) -> Self {
        Self {
            id: SubscriptionId::new(),
            user_id,
            package_id: package.id,
            remaining_credits: package.credits,
            start_date: now,
            end_date: now + chrono::Duration::days(package.duration_days),
            is_active: true,
            cancelled_at: None,
        }
    }

    /// Active and not yet past its end date.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.end_date >= now
    }

    /// Whole days until the end date (negative once lapsed).
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.end_date - now).num_days()
    }
}
