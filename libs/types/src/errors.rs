//! Error types for the marketplace core
//!
//! Comprehensive error taxonomy using thiserror

use crate::ids::{RequestId, ServiceTypeId, SubscriptionId, UserId};
use crate::request::{RequestStatus, Role};
use crate::Credits;
use thiserror::Error;

/// Top-level core error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Cost calculation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("Invalid priority level: {level} (expected 1, 2 or 3)")]
    InvalidPriority { level: u8 },
}

/// Credit ledger errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits {
        required: Credits,
        available: Credits,
    },

    #[error("Subscription not found: {subscription_id}")]
    SubscriptionNotFound { subscription_id: SubscriptionId },

    #[error("No active subscription for user {user_id}")]
    NoActiveSubscription { user_id: UserId },
}

/// Request lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("Invalid state transition from {from} to {requested}")]
    InvalidTransition {
        from: RequestStatus,
        requested: RequestStatus,
    },

    #[error("Request already claimed: {request_id}")]
    AlreadyClaimed { request_id: RequestId },

    #[error("Validation failed for \"{question}\": {reason}")]
    ValidationFailed { question: String, reason: String },

    #[error("Request not found: {request_id}")]
    RequestNotFound { request_id: RequestId },

    #[error("Service type not found: {service_type_id}")]
    ServiceTypeNotFound { service_type_id: ServiceTypeId },

    #[error("Role {role} may not {action}")]
    Forbidden { role: Role, action: String },
}

/// Realtime delivery errors.
///
/// Never fatal to the triggering business operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("No live channel for user {user_id}")]
    TransportUnavailable { user_id: UserId },
}

/// Storage layer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage backend error: {message}")]
    Backend { message: String },
}
