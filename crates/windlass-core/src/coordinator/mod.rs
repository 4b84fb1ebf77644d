//! The durable workflow execution coordinator.
//!
//! Consumes the two queues, routes each message to the step execution or
//! workflow resume handler, and upholds the two core invariants: per-run
//! serialization of resume processing, and at-most-once application of every
//! ledger-keyed side effect despite at-least-once delivery.

pub mod deferral;
pub mod dispatcher;
pub mod lease;
pub mod resume_handler;
pub mod service;
pub mod step_handler;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use deferral::DeferralScheduler;
pub use dispatcher::{BatchDispatcher, DispatchOutcome, MessageOutcome};
pub use lease::RunLeases;
pub use resume_handler::WorkflowResumeHandler;
pub use service::CoordinatorService;
pub use step_handler::StepExecutionHandler;
pub use worker::CoordinatorWorker;

/// How a handler disposed of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Terminal processing succeeded (or the delivery was a duplicate of
    /// finished work); the message was acknowledged and removed.
    Acked,
    /// Redelivery was deferred by extending the invisibility window.
    Deferred {
        /// Seconds of deferral actually applied (after clamping).
        seconds: u64,
    },
    /// The message was deliberately left unacknowledged so the substrate
    /// redelivers it with an incremented attempt.
    Redeliver,
}
