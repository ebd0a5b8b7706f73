//! The storage trait consumed by the core services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use types::errors::StorageError;
use types::ids::{NotificationId, PackageId, RequestId, ServiceTypeId, SubscriptionId, UserId};
use types::notification::Notification;
use types::request::{Request, RequestStatus};
use types::service::ServiceType;
use types::subscription::{Package, Subscription};
use types::Credits;

/// Record CRUD plus the conditional-update primitives the ledger and the
/// request engine linearize on.
///
/// Every conditional operation returns `Ok(true)` when its predicate
/// matched and the mutation was applied, `Ok(false)` when the predicate did
/// not match (zero rows affected). Callers translate `false` into the
/// appropriate business error; they never pre-read to decide.
#[async_trait]
pub trait Store: Send + Sync {
    // --- subscriptions ---

    async fn insert_subscription(&self, subscription: Subscription) -> Result<(), StorageError>;

    async fn subscription(&self, id: SubscriptionId)
        -> Result<Option<Subscription>, StorageError>;

    /// The user's subscription with `is_active` and `end_date >= now`.
    async fn active_subscription(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, StorageError>;

    /// Atomic spend: matches only while the subscription is active and
    /// holds at least `amount` credits.
    async fn debit_credits(
        &self,
        id: SubscriptionId,
        amount: Credits,
    ) -> Result<bool, StorageError>;

    /// Refund/grant credits back onto a subscription row.
    async fn credit_credits(
        &self,
        id: SubscriptionId,
        amount: Credits,
    ) -> Result<bool, StorageError>;

    /// Flip `is_active` off. Matches only rows still active, which makes
    /// repeated sweeps no-ops rather than errors.
    async fn deactivate_subscription(
        &self,
        id: SubscriptionId,
        cancelled_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError>;

    /// Active subscriptions whose end date falls within the next `days`.
    async fn subscriptions_expiring_within(
        &self,
        now: DateTime<Utc>,
        days: i64,
    ) -> Result<Vec<Subscription>, StorageError>;

    /// Active subscriptions already past their end date.
    async fn subscriptions_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, StorageError>;

    // --- catalog (admin-owned, read-only to the core) ---

    async fn insert_package(&self, package: Package) -> Result<(), StorageError>;

    async fn package(&self, id: PackageId) -> Result<Option<Package>, StorageError>;

    async fn insert_service_type(&self, service_type: ServiceType) -> Result<(), StorageError>;

    async fn service_type(&self, id: ServiceTypeId)
        -> Result<Option<ServiceType>, StorageError>;

    // --- requests ---

    async fn insert_request(&self, request: Request) -> Result<(), StorageError>;

    async fn request(&self, id: RequestId) -> Result<Option<Request>, StorageError>;

    /// Atomic claim: matches only while the request is PENDING and
    /// unassigned; assigns the provider and advances the row to APPROVED in
    /// the same step.
    async fn claim_request(&self, id: RequestId, provider: UserId)
        -> Result<bool, StorageError>;

    /// Full-row replace guarded on the current status (transition CAS).
    async fn update_request_if_status(
        &self,
        request: Request,
        expected: RequestStatus,
    ) -> Result<bool, StorageError>;

    // --- notifications ---

    async fn insert_notification(&self, notification: Notification) -> Result<(), StorageError>;

    async fn notification(
        &self,
        id: NotificationId,
    ) -> Result<Option<Notification>, StorageError>;

    /// All notifications for a user, newest first.
    async fn notifications_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Notification>, StorageError>;

    async fn mark_notification_read(&self, id: NotificationId) -> Result<bool, StorageError>;

    /// Returns how many rows flipped from unread to read.
    async fn mark_all_notifications_read(&self, user_id: UserId) -> Result<u64, StorageError>;

    async fn unread_count(&self, user_id: UserId) -> Result<u64, StorageError>;

    /// Whether the user already received a notification with this title
    /// since `since`. The sweeper's renotification guard.
    async fn notification_exists_since(
        &self,
        user_id: UserId,
        title: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, StorageError>;
}
