//! Notification dispatcher.
//!
//! Durable row first, live push second. Storage failures propagate: a
//! notification that was never persisted was never sent. Push failures are
//! logged and swallowed; the notification list and unread count guarantee
//! eventual visibility.

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use persistence::Store;
use types::errors::CoreError;
use types::ids::{NotificationId, UserId};
use types::notification::{Notification, PushKind, PushNote};

use crate::registry::ChannelRegistry;

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    registry: ChannelRegistry,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn Store>, registry: ChannelRegistry) -> Self {
        Self { store, registry }
    }

    /// Persist a notification and attempt a best-effort live push.
    pub async fn notify(
        &self,
        user_id: UserId,
        kind: PushKind,
        title: impl Into<String>,
        message: impl Into<String>,
        link: Option<String>,
    ) -> Result<NotificationId, CoreError> {
        let now = Utc::now();
        let notification = Notification::new(user_id, title, message, link, now);
        let id = notification.id;

        // Durable source of truth; failure here fails the call.
        self.store.insert_notification(notification.clone()).await?;

        // Fire-and-forget push, isolated from the durable write.
        let frame = kind.frame(PushNote {
            title: notification.title,
            message: notification.message,
            link: notification.link,
            timestamp: now,
        });
        if let Err(err) = self.registry.send(user_id, &frame) {
            debug!(%user_id, %err, "live push skipped");
        }

        Ok(id)
    }

    /// Mark one notification read. Idempotent; unknown ids are ignored.
    pub async fn mark_read(&self, id: NotificationId) -> Result<(), CoreError> {
        if !self.store.mark_notification_read(id).await? {
            debug!(%id, "mark_read on unknown notification");
        }
        Ok(())
    }

    /// Mark everything read for a user; returns how many rows flipped.
    pub async fn mark_all_read(&self, user_id: UserId) -> Result<u64, CoreError> {
        Ok(self.store.mark_all_notifications_read(user_id).await?)
    }

    pub async fn unread_count(&self, user_id: UserId) -> Result<u64, CoreError> {
        Ok(self.store.unread_count(user_id).await?)
    }
}
