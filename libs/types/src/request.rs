//! Request lifecycle types
//!
//! A request is the unit of work a client opens against a service type and
//! a provider fulfills. Its status walks a fixed state machine; its cost
//! fields carry the full pricing breakdown so the ledger invariant can be
//! checked after every transition.

use crate::ids::{RequestId, ServiceTypeId, SubscriptionId, UserId};
use crate::service::{AttributeResponse, Priority};
use crate::Credits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role attached to every inbound call by the auth collaborator.
///
/// The core trusts it and only enforces role-vs-transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Client,
    Provider,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "CLIENT"),
            Role::Provider => write!(f, "PROVIDER"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn client(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Client,
        }
    }

    pub fn provider(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Provider,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }
}

/// Request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Open and unassigned, waiting for a provider
    Pending,
    /// Claimed by a provider
    Approved,
    /// Provider is working
    InProgress,
    /// Work product handed to the client
    Delivered,
    /// Client asked for changes
    RevisionRequested,
    /// Accepted by the client (terminal)
    Completed,
    /// Cancelled by client, provider decline or admin (terminal)
    Cancelled,
}

impl RequestStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::InProgress => "IN_PROGRESS",
            RequestStatus::Delivered => "DELIVERED",
            RequestStatus::RevisionRequested => "REVISION_REQUESTED",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Classification of a revision against the package quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionKind {
    Free,
    Paid,
}

/// A service request.
///
/// Invariant: `credit_cost == base_credit_cost + priority_credit_cost +
/// sum(revision_surcharges)` after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub client_id: UserId,
    pub provider_id: Option<UserId>,
    pub service_type_id: ServiceTypeId,
    /// Subscription the creation debit came out of; refunds go back here.
    pub subscription_id: SubscriptionId,
    pub status: RequestStatus,
    pub priority: Priority,
    pub credit_cost: Credits,
    pub base_credit_cost: Credits,
    pub priority_credit_cost: Credits,
    /// Paid-revision surcharges in the order they were charged
    pub revision_surcharges: Vec<Credits>,
    pub current_revision_count: u32,
    pub total_revisions: u32,
    pub is_revision: bool,
    pub revision_type: Option<RevisionKind>,
    pub attribute_responses: Vec<AttributeResponse>,
    pub rating: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Request {
    /// Create a new pending, unassigned request.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_id: UserId,
        service_type_id: ServiceTypeId,
        subscription_id: SubscriptionId,
        priority: Priority,
        base_credit_cost: Credits,
        priority_credit_cost: Credits,
        attribute_responses: Vec<AttributeResponse>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            client_id,
            provider_id: None,
            service_type_id,
            subscription_id,
            status: RequestStatus::Pending,
            priority,
            credit_cost: base_credit_cost + priority_credit_cost,
            base_credit_cost,
            priority_credit_cost,
            revision_surcharges: Vec::new(),
            current_revision_count: 0,
            total_revisions: 0,
            is_revision: false,
            revision_type: None,
            attribute_responses,
            rating: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// Check the cost invariant: total = base + priority + surcharges.
    pub fn check_cost_invariant(&self) -> bool {
        let surcharges: Credits = self.revision_surcharges.iter().sum();
        self.credit_cost == self.base_credit_cost + self.priority_credit_cost + surcharges
    }

    /// Record a revision on the request.
    ///
    /// A paid revision carries its surcharge onto `credit_cost`; a free one
    /// only bumps the counters.
    ///
    /// # Panics
    /// Panics if the cost invariant would be violated.
    pub fn record_revision(&mut self, kind: RevisionKind, surcharge: Credits) {
        self.current_revision_count += 1;
        self.total_revisions += 1;
        self.is_revision = true;
        self.revision_type = Some(kind);

        if kind == RevisionKind::Paid {
            self.revision_surcharges.push(surcharge);
            self.credit_cost += surcharge;
        }

        assert!(
            self.check_cost_invariant(),
            "Cost invariant violated after revision"
        );
    }
}
