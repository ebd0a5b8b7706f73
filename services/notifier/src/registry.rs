//! Realtime channel registry.
//!
//! One live output stream per user. A new connection silently supersedes
//! the previous one; a failed write evicts the stale handle so later sends
//! stop retrying a dead stream. Each connection runs its own heartbeat
//! task, so one slow or dead client never stalls delivery to others.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use types::errors::NotifyError;
use types::ids::UserId;
use types::notification::RealtimePayload;

/// Keep-alive comment frame, understood by no client and dropped by every
/// proxy; its only job is to keep intermediaries from timing the stream
/// out.
const HEARTBEAT_FRAME: &str = ": heartbeat";

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Interval between keep-alive frames on every open connection.
    pub heartbeat_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

struct Connection {
    /// Monotonic connection generation; guards against a superseded
    /// connection's heartbeat evicting its replacement.
    generation: u64,
    sender: mpsc::UnboundedSender<String>,
    heartbeat: JoinHandle<()>,
}

struct Inner {
    connections: DashMap<UserId, Connection>,
    next_generation: AtomicU64,
    config: RegistryConfig,
}

/// Process-wide map of userId → open stream handle.
///
/// Cheap to clone; all clones share the same map. Callers receive the
/// registry by injection; there is no ambient global.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<Inner>,
}

impl ChannelRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connections: DashMap::new(),
                next_generation: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Open a stream for a user, replacing any prior connection.
    ///
    /// The returned receiver is the client's end of the stream. A
    /// `connected` frame is emitted once at open; it carries no business
    /// meaning.
    pub fn connect(&self, user_id: UserId) -> mpsc::UnboundedReceiver<String> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let greeting = serde_json::to_string(&RealtimePayload::Connected)
            .expect("connected frame serializes");
        let _ = sender.send(greeting);

        let heartbeat = tokio::spawn(Self::heartbeat_loop(
            self.inner.clone(),
            user_id,
            generation,
            sender.clone(),
        ));

        let previous = self.inner.connections.insert(
            user_id,
            Connection {
                generation,
                sender,
                heartbeat,
            },
        );
        if let Some(previous) = previous {
            // A new browser tab supersedes the old one; no multiplexing.
            previous.heartbeat.abort();
            debug!(%user_id, "superseded existing connection");
        }

        receiver
    }

    /// Drop a user's connection. Idempotent.
    pub fn disconnect(&self, user_id: UserId) {
        if let Some((_, connection)) = self.inner.connections.remove(&user_id) {
            connection.heartbeat.abort();
            debug!(%user_id, "disconnected");
        }
    }

    /// Push a payload to a user's live stream.
    ///
    /// No connection is not an error condition worth surfacing to business
    /// logic, but the caller may want to log it; a failed write evicts the
    /// stale handle before reporting.
    pub fn send(&self, user_id: UserId, payload: &RealtimePayload) -> Result<(), NotifyError> {
        let text = serde_json::to_string(payload).expect("realtime payload serializes");

        let (sender, generation) = match self.inner.connections.get(&user_id) {
            Some(connection) => (connection.sender.clone(), connection.generation),
            None => return Err(NotifyError::TransportUnavailable { user_id }),
        };

        if sender.send(text).is_err() {
            Self::evict(&self.inner, user_id, generation);
            return Err(NotifyError::TransportUnavailable { user_id });
        }
        Ok(())
    }

    /// Whether the user currently has a registered stream.
    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.inner.connections.contains_key(&user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Remove a connection, but only the exact generation that failed,
    /// never a replacement that raced in.
    fn evict(inner: &Inner, user_id: UserId, generation: u64) {
        let removed = inner
            .connections
            .remove_if(&user_id, |_, c| c.generation == generation);
        if let Some((_, connection)) = removed {
            connection.heartbeat.abort();
            debug!(%user_id, "evicted stale connection");
        }
    }

    async fn heartbeat_loop(
        inner: Arc<Inner>,
        user_id: UserId,
        generation: u64,
        sender: mpsc::UnboundedSender<String>,
    ) {
        let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
        // First tick completes immediately; the greeting already went out.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if sender.send(HEARTBEAT_FRAME.to_string()).is_err() {
                // Same cleanup as a failed send.
                Self::evict(&inner, user_id, generation);
                return;
            }
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::notification::{PushKind, PushNote};

    fn note() -> PushNote {
        PushNote {
            title: "t".to_string(),
            message: "m".to_string(),
            link: None,
            timestamp: chrono::Utc::now(),
        }
    }

    fn fast_registry() -> ChannelRegistry {
        ChannelRegistry::new(RegistryConfig {
            heartbeat_interval: Duration::from_millis(20),
        })
    }

    #[tokio::test]
    async fn test_connected_frame_sent_first() {
        let registry = ChannelRegistry::default();
        let mut rx = registry.connect(UserId::new());

        let first = rx.recv().await.unwrap();
        assert_eq!(first, r#"{"type":"connected"}"#);
    }

    #[tokio::test]
    async fn test_send_reaches_connected_user() {
        let registry = ChannelRegistry::default();
        let user = UserId::new();
        let mut rx = registry.connect(user);
        rx.recv().await.unwrap(); // greeting

        registry
            .send(user, &PushKind::Assignment.frame(note()))
            .unwrap();
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains(r#""type":"assignment""#));
    }

    #[tokio::test]
    async fn test_send_without_connection_is_noop() {
        let registry = ChannelRegistry::default();
        let user = UserId::new();
        let err = registry
            .send(user, &PushKind::General.frame(note()))
            .unwrap_err();
        assert_eq!(err, NotifyError::TransportUnavailable { user_id: user });
    }

    #[tokio::test]
    async fn test_new_connection_supersedes_old() {
        let registry = ChannelRegistry::default();
        let user = UserId::new();

        let mut old_rx = registry.connect(user);
        old_rx.recv().await.unwrap();
        let mut new_rx = registry.connect(user);
        new_rx.recv().await.unwrap();

        assert_eq!(registry.connection_count(), 1);

        registry
            .send(user, &PushKind::Message.frame(note()))
            .unwrap();
        let frame = new_rx.recv().await.unwrap();
        assert!(frame.contains(r#""type":"message""#));

        // The old stream is closed; its sender was dropped on replace.
        assert!(old_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_send_evicts_handle() {
        let registry = ChannelRegistry::default();
        let user = UserId::new();

        let rx = registry.connect(user);
        drop(rx); // client went away without a clean close

        let err = registry
            .send(user, &PushKind::General.frame(note()))
            .unwrap_err();
        assert_eq!(err, NotifyError::TransportUnavailable { user_id: user });
        // Self-healing: the dead handle is gone
        assert!(!registry.is_connected(user));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let registry = ChannelRegistry::default();
        let user = UserId::new();
        let _rx = registry.connect(user);

        registry.disconnect(user);
        registry.disconnect(user);
        assert!(!registry.is_connected(user));
    }

    #[tokio::test]
    async fn test_heartbeat_frames_flow() {
        let registry = fast_registry();
        let user = UserId::new();
        let mut rx = registry.connect(user);
        rx.recv().await.unwrap(); // greeting

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, HEARTBEAT_FRAME);
    }

    #[tokio::test]
    async fn test_heartbeat_failure_cleans_up() {
        let registry = fast_registry();
        let user = UserId::new();
        let rx = registry.connect(user);
        drop(rx);

        // Give the heartbeat a few intervals to hit the closed channel.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!registry.is_connected(user));
    }

    #[tokio::test]
    async fn test_independent_connections() {
        let registry = ChannelRegistry::default();
        let alice = UserId::new();
        let bob = UserId::new();

        let mut alice_rx = registry.connect(alice);
        let bob_rx = registry.connect(bob);
        alice_rx.recv().await.unwrap();
        drop(bob_rx); // bob is dead

        // Bob's dead stream must not affect alice.
        let _ = registry.send(bob, &PushKind::General.frame(note()));
        registry
            .send(alice, &PushKind::General.frame(note()))
            .unwrap();
        assert!(alice_rx.recv().await.unwrap().contains("general"));
    }
}
