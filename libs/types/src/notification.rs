//! Notification and realtime payload types
//!
//! The persisted `Notification` row is the durable source of truth; the
//! realtime payload is the best-effort frame pushed over a user's live
//! channel. The payload set is closed: a tagged enum, not an open
//! dictionary.

use crate::ids::{NotificationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable in-app notification.
///
/// Created by the dispatcher, mutated only by mark-read operations, never
/// deleted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
        link: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            title: title.into(),
            message: message.into(),
            link,
            is_read: false,
            created_at: now,
        }
    }
}

/// Body shared by all business-bearing realtime frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNote {
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Frame pushed over the realtime channel.
///
/// `Connected` is sent once at connection open and carries no business
/// meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimePayload {
    Connected,
    Message(PushNote),
    StatusChange(PushNote),
    Assignment(PushNote),
    General(PushNote),
}

/// Business category of a push, chosen by the caller of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    Message,
    StatusChange,
    Assignment,
    General,
}

impl PushKind {
    /// Wrap a note into the matching realtime frame.
    pub fn frame(self, note: PushNote) -> RealtimePayload {
        match self {
            PushKind::Message => RealtimePayload::Message(note),
            PushKind::StatusChange => RealtimePayload::StatusChange(note),
            PushKind::Assignment => RealtimePayload::Assignment(note),
            PushKind::General => RealtimePayload::General(note),
        }
    }
}
