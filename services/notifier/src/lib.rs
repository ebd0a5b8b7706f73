//! Notification fan-out
//!
//! Two halves: the `ChannelRegistry`, a process-wide map from user to one
//! live output stream with per-connection heartbeats, and the
//! `NotificationDispatcher`, which always writes the durable notification
//! row first and then attempts a best-effort push.
//!
//! **Delivery model:** the persisted row is the source of truth; the live
//! push is fire-and-forget. A push failure never fails the triggering
//! business operation.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::NotificationDispatcher;
pub use registry::{ChannelRegistry, RegistryConfig};
