//! Substrate implementations of the coordinator's ports.
//!
//! `queue` provides an in-process queue with at-least-once semantics,
//! visibility windows, and ordered delivery groups. `memory` and `sqlite`
//! provide the workflow store and idempotency ledger, in-process and
//! durable respectively.

pub mod memory;
pub mod queue;
pub mod sqlite;
