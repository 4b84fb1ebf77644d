//! Error taxonomy for the coordinator.
//!
//! The split mirrors how errors are resolved: transport and store faults are
//! transient (resolved by not acknowledging, letting substrate redelivery
//! act as the retry), duplicates short-circuit processing, and step/replay
//! faults become terminal events once their attempt ceiling is reached.

use thiserror::Error;

/// Errors from queue substrate operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue unavailable or the operation failed in transit. Never surfaced
    /// to a run as a failure; the message stays unacknowledged.
    #[error("transport error: {0}")]
    Transport(String),

    /// The substrate no longer knows the receipt handle (visibility window
    /// already lapsed, message redelivered elsewhere).
    #[error("unknown receipt handle: {0}")]
    UnknownReceipt(String),

    /// The substrate has shut down.
    #[error("queue closed")]
    Closed,
}

/// Errors from durable store operations (runs, steps, events, ledger).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors surfaced by coordinator handlers.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Queue substrate fault (transient; resolved by redelivery).
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Durable store fault (transient; resolved by redelivery).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The delivery is a logical duplicate of already-applied work.
    /// Expected and non-fatal: callers must be able to distinguish
    /// "already done" from "failed".
    #[error("duplicate operation: {0}")]
    Duplicate(String),

    /// A user step body failed.
    #[error("step '{step_id}' failed: {error}")]
    StepExecution { step_id: String, error: String },

    /// The replay engine raised unexpectedly.
    #[error("replay fault: {0}")]
    ReplayFault(String),

    /// A message payload could not be interpreted for its queue.
    #[error("corrupt message: {0}")]
    CorruptMessage(String),
}

impl CoordinatorError {
    /// Whether this error short-circuits as an expected duplicate.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, CoordinatorError::Duplicate(_))
    }
}
