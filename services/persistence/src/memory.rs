//! In-memory reference store.
//!
//! Every conditional operation checks and mutates under a single write-lock
//! acquisition, which gives it the same linearization a relational
//! conditional UPDATE provides. This is the store the test suites run
//! against.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use types::errors::StorageError;
use types::ids::{NotificationId, PackageId, RequestId, ServiceTypeId, SubscriptionId, UserId};
use types::notification::Notification;
use types::request::{Request, RequestStatus};
use types::service::ServiceType;
use types::subscription::{Package, Subscription};
use types::Credits;

use crate::store::Store;

#[derive(Default)]
struct State {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    packages: HashMap<PackageId, Package>,
    service_types: HashMap<ServiceTypeId, ServiceType>,
    requests: HashMap<RequestId, Request>,
    notifications: HashMap<NotificationId, Notification>,
}

/// Reference [`Store`] backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_subscription(&self, subscription: Subscription) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    async fn subscription(
        &self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, StorageError> {
        let state = self.state.read().await;
        Ok(state.subscriptions.get(&id).cloned())
    }

    async fn active_subscription(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .find(|s| s.user_id == user_id && s.is_current(now))
            .cloned())
    }

    async fn debit_credits(
        &self,
        id: SubscriptionId,
        amount: Credits,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        match state.subscriptions.get_mut(&id) {
            Some(sub) if sub.is_active && sub.remaining_credits >= amount => {
                sub.remaining_credits -= amount;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn credit_credits(
        &self,
        id: SubscriptionId,
        amount: Credits,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        match state.subscriptions.get_mut(&id) {
            Some(sub) => {
                sub.remaining_credits += amount;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_subscription(
        &self,
        id: SubscriptionId,
        cancelled_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        match state.subscriptions.get_mut(&id) {
            Some(sub) if sub.is_active => {
                sub.is_active = false;
                if cancelled_at.is_some() {
                    sub.cancelled_at = cancelled_at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn subscriptions_expiring_within(
        &self,
        now: DateTime<Utc>,
        days: i64,
    ) -> Result<Vec<Subscription>, StorageError> {
        let horizon = now + Duration::days(days);
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.is_active && s.end_date >= now && s.end_date <= horizon)
            .cloned()
            .collect())
    }

    async fn subscriptions_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.is_active && s.end_date < now)
            .cloned()
            .collect())
    }

    async fn insert_package(&self, package: Package) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.packages.insert(package.id, package);
        Ok(())
    }

    async fn package(&self, id: PackageId) -> Result<Option<Package>, StorageError> {
        let state = self.state.read().await;
        Ok(state.packages.get(&id).cloned())
    }

    async fn insert_service_type(&self, service_type: ServiceType) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.service_types.insert(service_type.id, service_type);
        Ok(())
    }

    async fn service_type(
        &self,
        id: ServiceTypeId,
    ) -> Result<Option<ServiceType>, StorageError> {
        let state = self.state.read().await;
        Ok(state.service_types.get(&id).cloned())
    }

    async fn insert_request(&self, request: Request) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.requests.insert(request.id, request);
        Ok(())
    }

    async fn request(&self, id: RequestId) -> Result<Option<Request>, StorageError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id).cloned())
    }

    async fn claim_request(
        &self,
        id: RequestId,
        provider: UserId,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        match state.requests.get_mut(&id) {
            Some(req) if req.status == RequestStatus::Pending && req.provider_id.is_none() => {
                req.provider_id = Some(provider);
                req.status = RequestStatus::Approved;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_request_if_status(
        &self,
        request: Request,
        expected: RequestStatus,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        match state.requests.get_mut(&request.id) {
            Some(existing) if existing.status == expected => {
                *existing = request;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_notification(&self, notification: Notification) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        state.notifications.insert(notification.id, notification);
        Ok(())
    }

    async fn notification(
        &self,
        id: NotificationId,
    ) -> Result<Option<Notification>, StorageError> {
        let state = self.state.read().await;
        Ok(state.notifications.get(&id).cloned())
    }

    async fn notifications_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Notification>, StorageError> {
        let state = self.state.read().await;
        let mut list: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        match state.notifications.get_mut(&id) {
            Some(n) => {
                n.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_notifications_read(&self, user_id: UserId) -> Result<u64, StorageError> {
        let mut state = self.state.write().await;
        let mut flipped = 0;
        for n in state.notifications.values_mut() {
            if n.user_id == user_id && !n.is_read {
                n.is_read = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn unread_count(&self, user_id: UserId) -> Result<u64, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as u64)
    }

    async fn notification_exists_since(
        &self,
        user_id: UserId,
        title: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .values()
            .any(|n| n.user_id == user_id && n.title == title && n.created_at >= since))
    }
}
