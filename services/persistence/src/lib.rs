//! Storage port for the marketplace credit engine
//!
//! The relational store itself is an external collaborator; this crate owns
//! the interface the core consumes. The two shared mutable rows
//! (Subscription, Request) are only ever mutated through conditional
//! updates that report whether their predicate matched, so concurrent
//! access never needs read-then-write.
//!
//! `MemoryStore` is the reference implementation every test runs against; a
//! SQL adapter would implement the same trait with `UPDATE ... WHERE`
//! statements.

pub mod cache;
pub mod memory;
pub mod store;

pub use cache::{CacheInvalidator, EntityKind, NoopInvalidator, RecordingInvalidator};
pub use memory::MemoryStore;
pub use store::Store;
