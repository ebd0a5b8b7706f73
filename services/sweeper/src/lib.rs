//! Subscription Expiry Sweeper
//!
//! A scheduled pass over active subscriptions: warn users whose
//! subscription ends in exactly seven days, notify and deactivate the ones
//! already past their end date. The trigger is external (cron-style); the
//! entry point is idempotent and takes `now` explicitly, so re-running a
//! sweep for the same instant produces no additional side effects.
//!
//! Per-item failures go into the report: one user's broken notification
//! must not block deactivating everyone else.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use notifier::NotificationDispatcher;
use persistence::Store;
use types::ids::{SubscriptionId, UserId};
use types::notification::PushKind;
use types::subscription::Subscription;

/// Title of the seven-days-out warning; also the renotification dedupe key.
pub const EXPIRING_SOON_TITLE: &str = "Subscription expiring soon";

/// Title of the lapsed notice; also the renotification dedupe key.
pub const EXPIRED_TITLE: &str = "Subscription expired";

/// Warning lead time and renotification window, in days.
const WINDOW_DAYS: i64 = 7;

/// One failed item in a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepError {
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub message: String,
}

/// Structured result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expiring_notified: u32,
    pub expired_notified: u32,
    pub expired_deactivated: u32,
    pub errors: Vec<SweepError>,
}

/// The sweeper service.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn Store>,
    dispatcher: NotificationDispatcher,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn Store>, dispatcher: NotificationDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Run one sweep at the given instant.
    pub async fn run(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        self.warn_expiring(now, &mut report).await;
        self.retire_expired(now, &mut report).await;

        info!(
            expiring_notified = report.expiring_notified,
            expired_notified = report.expired_notified,
            expired_deactivated = report.expired_deactivated,
            errors = report.errors.len(),
            "sweep finished"
        );
        report
    }

    /// Phase 1: warn subscriptions ending in exactly seven days.
    ///
    /// The equality check (not "within seven days") keeps the warning from
    /// refiring every day of the final week; the notification-window check
    /// covers re-runs inside one day.
    async fn warn_expiring(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let candidates = match self.store.subscriptions_expiring_within(now, WINDOW_DAYS).await {
            Ok(subs) => subs,
            Err(err) => {
                warn!(%err, "expiring-subscription scan failed");
                return;
            }
        };

        for subscription in candidates {
            if subscription.days_remaining(now) != WINDOW_DAYS {
                continue;
            }
            match self.notify_once(&subscription, now, EXPIRING_SOON_TITLE, || {
                format!(
                    "Your subscription ends on {}; {} credits remain",
                    subscription.end_date.format("%Y-%m-%d"),
                    subscription.remaining_credits
                )
            })
            .await
            {
                Ok(true) => report.expiring_notified += 1,
                Ok(false) => {}
                Err(message) => report.errors.push(SweepError {
                    subscription_id: subscription.id,
                    user_id: subscription.user_id,
                    message,
                }),
            }
        }
    }

    /// Phase 2: notify and deactivate lapsed subscriptions.
    async fn retire_expired(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let lapsed = match self.store.subscriptions_expired(now).await {
            Ok(subs) => subs,
            Err(err) => {
                warn!(%err, "expired-subscription scan failed");
                return;
            }
        };

        for subscription in lapsed {
            match self.notify_once(&subscription, now, EXPIRED_TITLE, || {
                format!(
                    "Your subscription ended on {}",
                    subscription.end_date.format("%Y-%m-%d")
                )
            })
            .await
            {
                Ok(true) => report.expired_notified += 1,
                Ok(false) => {}
                Err(message) => report.errors.push(SweepError {
                    subscription_id: subscription.id,
                    user_id: subscription.user_id,
                    message,
                }),
            }

            // Deactivate regardless of how the notification fared.
            match self.store.deactivate_subscription(subscription.id, None).await {
                Ok(true) => report.expired_deactivated += 1,
                Ok(false) => {} // already inactive; a re-run is a no-op read
                Err(err) => report.errors.push(SweepError {
                    subscription_id: subscription.id,
                    user_id: subscription.user_id,
                    message: err.to_string(),
                }),
            }
        }
    }

    /// Send a titled notification unless the user already got one inside
    /// the renotification window. Ok(true) = sent, Ok(false) = deduped.
    async fn notify_once(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
        title: &str,
        message: impl FnOnce() -> String,
    ) -> Result<bool, String> {
        let since = now - Duration::days(WINDOW_DAYS);
        let already_sent = self
            .store
            .notification_exists_since(subscription.user_id, title, since)
            .await
            .map_err(|e| e.to_string())?;
        if already_sent {
            return Ok(false);
        }

        self.dispatcher
            .notify(
                subscription.user_id,
                PushKind::General,
                title,
                message(),
                Some("/subscriptions".to_string()),
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use notifier::{ChannelRegistry, RegistryConfig};
    use persistence::MemoryStore;
    use types::errors::StorageError;
    use types::ids::{NotificationId, PackageId, RequestId, ServiceTypeId};
    use types::notification::Notification;
    use types::request::{Request, RequestStatus};
    use types::service::ServiceType;
    use types::subscription::Package;
    use types::Credits;

    fn sweeper_over(store: Arc<dyn Store>) -> ExpirySweeper {
        let registry = ChannelRegistry::new(RegistryConfig {
            heartbeat_interval: std::time::Duration::from_secs(300),
        });
        let dispatcher = NotificationDispatcher::new(store.clone(), registry);
        ExpirySweeper::new(store, dispatcher)
    }

    fn subscription_ending(
        end: DateTime<Utc>,
        now: DateTime<Utc>,
        credits: Credits,
    ) -> Subscription {
        Subscription {
            id: SubscriptionId::new(),
            user_id: UserId::new(),
            package_id: PackageId::new(),
            remaining_credits: credits,
            start_date: now - Duration::days(23),
            end_date: end,
            is_active: true,
            cancelled_at: None,
        }
    }

    #[tokio::test]
    async fn test_expired_subscription_notified_and_deactivated() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = sweeper_over(store.clone());
        let now = Utc::now();

        let sub = subscription_ending(now - Duration::days(1), now, 3);
        let (sub_id, user) = (sub.id, sub.user_id);
        store.insert_subscription(sub).await.unwrap();

        let report = sweeper.run(now).await;
        assert_eq!(report.expired_notified, 1);
        assert_eq!(report.expired_deactivated, 1);
        assert_eq!(report.expiring_notified, 0);
        assert!(report.errors.is_empty());

        let row = store.subscription(sub_id).await.unwrap().unwrap();
        assert!(!row.is_active);

        let since = now - Duration::days(7);
        assert!(store
            .notification_exists_since(user, EXPIRED_TITLE, since)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = sweeper_over(store.clone());
        let now = Utc::now();

        let expired = subscription_ending(now - Duration::days(1), now, 0);
        let expiring = subscription_ending(now + Duration::days(7) + Duration::hours(2), now, 5);
        let expiring_user = expiring.user_id;
        store.insert_subscription(expired).await.unwrap();
        store.insert_subscription(expiring).await.unwrap();

        let first = sweeper.run(now).await;
        assert_eq!(first.expired_notified, 1);
        assert_eq!(first.expired_deactivated, 1);
        assert_eq!(first.expiring_notified, 1);

        // Same instant again: nothing new fires.
        let second = sweeper.run(now).await;
        assert_eq!(second.expired_notified, 0);
        assert_eq!(second.expired_deactivated, 0);
        assert_eq!(second.expiring_notified, 0);
        assert!(second.errors.is_empty());

        // The warning exists exactly once.
        let warnings = store
            .notifications_for_user(expiring_user)
            .await
            .unwrap()
            .into_iter()
            .filter(|n| n.title == EXPIRING_SOON_TITLE)
            .count();
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn test_expiring_warning_only_at_exactly_seven_days() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = sweeper_over(store.clone());
        let now = Utc::now();

        // 6 days out and 3 days out: inside the window, but not the
        // seven-day mark, so no warning.
        let close = subscription_ending(now + Duration::days(6) + Duration::hours(1), now, 5);
        let closer = subscription_ending(now + Duration::days(3), now, 5);
        store.insert_subscription(close).await.unwrap();
        store.insert_subscription(closer).await.unwrap();

        let report = sweeper.run(now).await;
        assert_eq!(report.expiring_notified, 0);
        assert_eq!(report.expired_notified, 0);
    }

    /// Store wrapper that refuses to persist notifications for one user.
    struct FailingNotifications {
        inner: MemoryStore,
        broken_user: UserId,
    }

    #[async_trait]
    impl Store for FailingNotifications {
        async fn insert_subscription(&self, s: Subscription) -> Result<(), StorageError> {
            self.inner.insert_subscription(s).await
        }
        async fn subscription(
            &self,
            id: SubscriptionId,
        ) -> Result<Option<Subscription>, StorageError> {
            self.inner.subscription(id).await
        }
        async fn active_subscription(
            &self,
            user_id: UserId,
            now: DateTime<Utc>,
        ) -> Result<Option<Subscription>, StorageError> {
            self.inner.active_subscription(user_id, now).await
        }
        async fn debit_credits(
            &self,
            id: SubscriptionId,
            amount: Credits,
        ) -> Result<bool, StorageError> {
            self.inner.debit_credits(id, amount).await
        }
        async fn credit_credits(
            &self,
            id: SubscriptionId,
            amount: Credits,
        ) -> Result<bool, StorageError> {
            self.inner.credit_credits(id, amount).await
        }
        async fn deactivate_subscription(
            &self,
            id: SubscriptionId,
            cancelled_at: Option<DateTime<Utc>>,
        ) -> Result<bool, StorageError> {
            self.inner.deactivate_subscription(id, cancelled_at).await
        }
        async fn subscriptions_expiring_within(
            &self,
            now: DateTime<Utc>,
            days: i64,
        ) -> Result<Vec<Subscription>, StorageError> {
            self.inner.subscriptions_expiring_within(now, days).await
        }
        async fn subscriptions_expired(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<Subscription>, StorageError> {
            self.inner.subscriptions_expired(now).await
        }
        async fn insert_package(&self, p: Package) -> Result<(), StorageError> {
            self.inner.insert_package(p).await
        }
        async fn package(&self, id: PackageId) -> Result<Option<Package>, StorageError> {
            self.inner.package(id).await
        }
        async fn insert_service_type(&self, s: ServiceType) -> Result<(), StorageError> {
            self.inner.insert_service_type(s).await
        }
        async fn service_type(
            &self,
            id: ServiceTypeId,
        ) -> Result<Option<ServiceType>, StorageError> {
            self.inner.service_type(id).await
        }
        async fn insert_request(&self, r: Request) -> Result<(), StorageError> {
            self.inner.insert_request(r).await
        }
        async fn request(&self, id: RequestId) -> Result<Option<Request>, StorageError> {
            self.inner.request(id).await
        }
        async fn claim_request(
            &self,
            id: RequestId,
            provider: UserId,
        ) -> Result<bool, StorageError> {
            self.inner.claim_request(id, provider).await
        }
        async fn update_request_if_status(
            &self,
            request: Request,
            expected: RequestStatus,
        ) -> Result<bool, StorageError> {
            self.inner.update_request_if_status(request, expected).await
        }
        async fn insert_notification(&self, n: Notification) -> Result<(), StorageError> {
            if n.user_id == self.broken_user {
                return Err(StorageError::Backend {
                    message: "notification write refused".to_string(),
                });
            }
            self.inner.insert_notification(n).await
        }
        async fn notification(
            &self,
            id: NotificationId,
        ) -> Result<Option<Notification>, StorageError> {
            self.inner.notification(id).await
        }
        async fn notifications_for_user(
            &self,
            user_id: UserId,
        ) -> Result<Vec<Notification>, StorageError> {
            self.inner.notifications_for_user(user_id).await
        }
        async fn mark_notification_read(&self, id: NotificationId) -> Result<bool, StorageError> {
            self.inner.mark_notification_read(id).await
        }
        async fn mark_all_notifications_read(&self, user_id: UserId) -> Result<u64, StorageError> {
            self.inner.mark_all_notifications_read(user_id).await
        }
        async fn unread_count(&self, user_id: UserId) -> Result<u64, StorageError> {
            self.inner.unread_count(user_id).await
        }
        async fn notification_exists_since(
            &self,
            user_id: UserId,
            title: &str,
            since: DateTime<Utc>,
        ) -> Result<bool, StorageError> {
            self.inner.notification_exists_since(user_id, title, since).await
        }
    }

    #[tokio::test]
    async fn test_one_broken_item_does_not_block_the_batch() {
        let now = Utc::now();
        let broken = subscription_ending(now - Duration::days(1), now, 0);
        let healthy = subscription_ending(now - Duration::days(2), now, 0);
        let (broken_id, healthy_id) = (broken.id, healthy.id);

        let store = Arc::new(FailingNotifications {
            inner: MemoryStore::new(),
            broken_user: broken.user_id,
        });
        store.insert_subscription(broken).await.unwrap();
        store.insert_subscription(healthy).await.unwrap();

        let sweeper = sweeper_over(store.clone());
        let report = sweeper.run(now).await;

        // The healthy user was notified; the broken one produced an error.
        assert_eq!(report.expired_notified, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].subscription_id, broken_id);

        // Both rows were still deactivated.
        assert_eq!(report.expired_deactivated, 2);
        assert!(!store.subscription(broken_id).await.unwrap().unwrap().is_active);
        assert!(!store.subscription(healthy_id).await.unwrap().unwrap().is_active);
    }
}
