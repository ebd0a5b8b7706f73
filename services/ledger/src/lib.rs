//! Credit Ledger
//!
//! Owns every mutation of a subscription's credit balance. Spends are
//! expressed as conditional updates against the storage port: zero rows
//! affected is the insufficient-funds signal, never a separate read
//! followed by a write. Two debits racing on the same subscription can
//! never spend more than the available balance.
//!
//! **Key invariants:**
//! - `remaining_credits` never goes negative
//! - Refunds are explicit credits, never negative debits
//! - A user holds at most one active subscription at a time

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use persistence::cache::{invalidate_quietly, CacheInvalidator, EntityKind};
use persistence::Store;
use types::errors::{CoreError, LedgerError};
use types::ids::{SubscriptionId, UserId};
use types::subscription::{Package, Subscription};
use types::Credits;

/// The ledger service.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
    cache: Arc<dyn CacheInvalidator>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { store, cache }
    }

    /// Spend `amount` credits from a subscription.
    ///
    /// The decision is a single conditional update; the balance is re-read
    /// only to populate the error message once the spend already failed.
    pub async fn debit(
        &self,
        subscription_id: SubscriptionId,
        amount: Credits,
    ) -> Result<(), CoreError> {
        if self.store.debit_credits(subscription_id, amount).await? {
            info!(%subscription_id, amount, "debited credits");
            invalidate_quietly(
                self.cache.as_ref(),
                EntityKind::Subscription,
                &subscription_id.to_string(),
                &[],
            );
            return Ok(());
        }

        match self.store.subscription(subscription_id).await? {
            Some(sub) => Err(LedgerError::InsufficientCredits {
                required: amount,
                available: sub.remaining_credits,
            }
            .into()),
            None => Err(LedgerError::SubscriptionNotFound { subscription_id }.into()),
        }
    }

    /// Return credits to a subscription (refunds). Never a negative debit.
    pub async fn credit(
        &self,
        subscription_id: SubscriptionId,
        amount: Credits,
    ) -> Result<(), CoreError> {
        if !self.store.credit_credits(subscription_id, amount).await? {
            return Err(LedgerError::SubscriptionNotFound { subscription_id }.into());
        }
        info!(%subscription_id, amount, "credited credits");
        invalidate_quietly(
            self.cache.as_ref(),
            EntityKind::Subscription,
            &subscription_id.to_string(),
            &[],
        );
        Ok(())
    }

    /// The user's current subscription, if any.
    pub async fn get_active(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, CoreError> {
        Ok(self.store.active_subscription(user_id, now).await?)
    }

    /// The user's current subscription, or `NoActiveSubscription`.
    pub async fn require_active(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Subscription, CoreError> {
        self.get_active(user_id, now)
            .await?
            .ok_or_else(|| LedgerError::NoActiveSubscription { user_id }.into())
    }

    /// Mint a subscription from a package.
    ///
    /// Covers both purchase and the automatic free-package grant at
    /// registration. Any prior active subscription is deactivated first so
    /// at most one is ever current; expiry happens asynchronously in the
    /// sweeper, so this cannot be left to a uniqueness constraint.
    pub async fn grant(
        &self,
        user_id: UserId,
        package: &Package,
        now: DateTime<Utc>,
    ) -> Result<Subscription, CoreError> {
        if let Some(previous) = self.store.active_subscription(user_id, now).await? {
            self.store
                .deactivate_subscription(previous.id, None)
                .await?;
            invalidate_quietly(
                self.cache.as_ref(),
                EntityKind::Subscription,
                &previous.id.to_string(),
                &[format!("user:{}", user_id)],
            );
        }

        let subscription = Subscription::from_package(user_id, package, now);
        self.store.insert_subscription(subscription.clone()).await?;
        info!(
            %user_id,
            subscription_id = %subscription.id,
            package = %package.name,
            credits = package.credits,
            "granted subscription"
        );
        invalidate_quietly(
            self.cache.as_ref(),
            EntityKind::Subscription,
            &subscription.id.to_string(),
            &[format!("user:{}", user_id)],
        );
        Ok(subscription)
    }

    /// Cancel a subscription: deactivate and stamp `cancelled_at`.
    ///
    /// Cancelling an already-inactive subscription is a no-op.
    pub async fn cancel(
        &self,
        subscription_id: SubscriptionId,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.store.subscription(subscription_id).await?.is_none() {
            return Err(LedgerError::SubscriptionNotFound { subscription_id }.into());
        }

        if self
            .store
            .deactivate_subscription(subscription_id, Some(now))
            .await?
        {
            info!(%subscription_id, "cancelled subscription");
            invalidate_quietly(
                self.cache.as_ref(),
                EntityKind::Subscription,
                &subscription_id.to_string(),
                &[],
            );
        }
        Ok(())
    }
}
