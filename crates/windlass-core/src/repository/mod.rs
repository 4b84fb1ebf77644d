//! Durable store port traits.
//!
//! The coordinator's only shared mutable resources are the workflow store
//! and the idempotency ledger. Every write through these traits is
//! conditional (create-if-absent, append-only, or status-guarded) so that
//! concurrent or duplicate deliveries cannot corrupt state.

pub mod ledger;
pub mod workflow;

pub use ledger::{IdempotencyLedger, LedgerEntry};
pub use workflow::{StepCreate, WorkflowStore};
