//! Service catalog types
//!
//! Service types are admin-owned catalog entries: a base credit cost, a
//! per-service priority surcharge table and the intake questions a client
//! must answer when opening a request. Read-only to the core.

use crate::errors::PricingError;
use crate::ids::ServiceTypeId;
use crate::Credits;
use serde::{Deserialize, Serialize};

/// Priority tier for a request.
///
/// Wire levels 1/2/3 map to Low/Medium/High; anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Parse the numeric level used by callers.
    pub fn from_level(level: u8) -> Result<Self, PricingError> {
        match level {
            1 => Ok(Priority::Low),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::High),
            _ => Err(PricingError::InvalidPriority { level }),
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
        }
    }
}

/// Per-service priority surcharge table.
///
/// Surcharges are non-negative credit amounts added on top of the base cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCostTable {
    pub low: Credits,
    pub medium: Credits,
    pub high: Credits,
}

impl PriorityCostTable {
    /// Surcharge for the given tier.
    pub fn surcharge(&self, priority: Priority) -> Credits {
        match priority {
            Priority::Low => self.low,
            Priority::Medium => self.medium,
            Priority::High => self.high,
        }
    }
}

impl Default for PriorityCostTable {
    /// Table applied when a service has no explicit surcharges configured.
    fn default() -> Self {
        Self {
            low: 0,
            medium: 1,
            high: 2,
        }
    }
}

/// Kind of answer an intake question accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKind {
    /// Free-form text
    Text,
    /// One or more choices out of a fixed option list
    MultiSelect { options: Vec<String> },
}

/// An intake question attached to a service type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub prompt: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
    pub required: bool,
}

/// A client's answer to an intake question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Text(String),
    Selection(Vec<String>),
}

impl Answer {
    /// Whether the answer carries content.
    ///
    /// Text must be non-blank after trimming; a selection must be non-empty.
    pub fn is_answered(&self) -> bool {
        match self {
            Answer::Text(s) => !s.trim().is_empty(),
            Answer::Selection(items) => !items.is_empty(),
        }
    }
}

/// A (question, answer) pair recorded on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeResponse {
    pub question: String,
    pub answer: Answer,
}

/// A service offered on the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceType {
    pub id: ServiceTypeId,
    pub name: String,
    pub base_credit_cost: Credits,
    pub priority_costs: PriorityCostTable,
    pub attributes: Vec<QuestionSpec>,
    pub is_active: bool,
}
