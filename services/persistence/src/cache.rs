//! Cache invalidation port.
//!
//! The read-through cache lives outside the core; this is the thin
//! dependency the ledger and the request engine call into after every
//! persisted mutation. An unreachable cache never fails the triggering
//! operation; staleness is acceptable, ledger correctness is not.

use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

/// Entity kinds whose cached projections the core mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Subscription,
    Request,
    Notification,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Subscription => "subscription",
            EntityKind::Request => "request",
            EntityKind::Notification => "notification",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Cache unreachable: {message}")]
    Unreachable { message: String },
}

/// The invalidation hook.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(
        &self,
        kind: EntityKind,
        entity_id: &str,
        related_keys: &[String],
    ) -> Result<(), CacheError>;
}

/// Invalidate and swallow failures with a warning.
///
/// The single call site pattern for everything in the core: mutations
/// already committed must not be failed by the cache layer.
pub fn invalidate_quietly(
    cache: &dyn CacheInvalidator,
    kind: EntityKind,
    entity_id: &str,
    related_keys: &[String],
) {
    if let Err(err) = cache.invalidate(kind, entity_id, related_keys) {
        warn!(kind = kind.as_str(), entity_id, %err, "cache invalidation failed");
    }
}

/// Default invalidator when no cache is wired up.
#[derive(Debug, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(
        &self,
        _kind: EntityKind,
        _entity_id: &str,
        _related_keys: &[String],
    ) -> Result<(), CacheError> {
        Ok(())
    }
}

/// A recorded invalidation, for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub kind: &'static str,
    pub entity_id: String,
    pub related_keys: Vec<String>,
}

/// Test invalidator that records every call; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    events: Mutex<Vec<Invalidation>>,
    fail: bool,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An invalidator that always reports the cache as unreachable.
    pub fn unreachable() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<Invalidation> {
        self.events.lock().unwrap().clone()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(
        &self,
        kind: EntityKind,
        entity_id: &str,
        related_keys: &[String],
    ) -> Result<(), CacheError> {
        if self.fail {
            return Err(CacheError::Unreachable {
                message: "recording invalidator configured to fail".to_string(),
            });
        }
        self.events.lock().unwrap().push(Invalidation {
            kind: kind.as_str(),
            entity_id: entity_id.to_string(),
            related_keys: related_keys.to_vec(),
        });
        Ok(())
    }
}
