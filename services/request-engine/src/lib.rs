//! Request Lifecycle Engine
//!
//! The state machine that walks a request from PENDING to a terminal state,
//! validating every transition against the caller's role and the current
//! status, pricing creations and revisions through the cost calculator, and
//! spending/refunding through the credit ledger.
//!
//! **Key invariants:**
//! - A request row and its ledger debit succeed or fail together
//! - `claim` is a single conditional update; two racing providers get
//!   exactly one winner
//! - Illegal transitions are business-rule violations returned to the
//!   caller, never retried internally

pub mod engine;
pub mod validate;

pub use engine::{CreateRequest, RequestEngine};
