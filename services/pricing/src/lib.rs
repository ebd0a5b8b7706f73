//! Cost Calculator
//!
//! Pure pricing functions for the marketplace: creation cost from the
//! per-service surcharge table, free/paid revision classification against
//! the package quota, and the display breakdown that reconstructs a stored
//! total.
//!
//! **Key invariants:**
//! - Side-effect free; errors are reported, never retried
//! - The breakdown never claims a unit×count multiplier that does not
//!   reproduce the stored total

use serde::{Deserialize, Serialize};
use types::request::{Request, RevisionKind};
use types::service::{Priority, PriorityCostTable};
use types::Credits;

/// Cost of creating a request: base cost plus the priority surcharge.
pub fn creation_cost(base_cost: Credits, priority: Priority, table: &PriorityCostTable) -> Credits {
    base_cost + table.surcharge(priority)
}

/// A classified revision charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionCharge {
    pub kind: RevisionKind,
    /// Zero for free revisions, the unit cost for paid ones
    pub cost: Credits,
}

/// Classify the next revision on a request.
///
/// `revisions_used` is the request's revision count *before* this revision:
/// the k-th revision (k = revisions_used + 1) is free while k does not
/// exceed the package quota, and paid at the unit cost afterwards.
pub fn classify_revision(
    revisions_used: u32,
    max_free_revisions: u32,
    paid_unit_cost: Credits,
) -> RevisionCharge {
    if revisions_used < max_free_revisions {
        RevisionCharge {
            kind: RevisionKind::Free,
            cost: 0,
        }
    } else {
        RevisionCharge {
            kind: RevisionKind::Paid,
            cost: paid_unit_cost,
        }
    }
}

/// Revision portion of a cost breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "display", rename_all = "snake_case")]
pub enum RevisionPart {
    /// No paid revisions recorded
    None,
    /// Total is an exact multiple of the current unit cost
    Metered { unit: Credits, count: u32 },
    /// Raw additive figure; the stored total does not decompose under the
    /// current unit cost (historical requests priced under an older rate)
    Flat { total: Credits },
}

impl RevisionPart {
    /// Credits this part contributes to the total.
    pub fn total(&self) -> Credits {
        match self {
            RevisionPart::None => 0,
            RevisionPart::Metered { unit, count } => unit * *count as Credits,
            RevisionPart::Flat { total } => *total,
        }
    }
}

/// User-facing decomposition of a request's stored `credit_cost`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub base: Credits,
    pub priority: Credits,
    pub revisions: RevisionPart,
    pub total: Credits,
}

impl CostBreakdown {
    /// Reconstruct the breakdown of a stored total.
    ///
    /// The paid-revision delta is whatever the stored total carries beyond
    /// base + priority. A unit×count multiplier is shown only when the
    /// delta divides exactly by the current unit cost; otherwise the raw
    /// delta is reported as-is.
    pub fn reconstruct(request: &Request, unit_cost: Credits) -> Self {
        let base = request.base_credit_cost;
        let priority = request.priority_credit_cost;
        let delta = request.credit_cost - base - priority;

        let revisions = if delta == 0 {
            RevisionPart::None
        } else if delta > 0 && unit_cost > 0 && delta % unit_cost == 0 {
            RevisionPart::Metered {
                unit: unit_cost,
                count: (delta / unit_cost) as u32,
            }
        } else {
            RevisionPart::Flat { total: delta }
        };

        Self {
            base,
            priority,
            revisions,
            total: request.credit_cost,
        }
    }

    /// The breakdown must always re-sum to the stored total.
    pub fn check_invariant(&self) -> bool {
        self.base + self.priority + self.revisions.total() == self.total
    }
}
