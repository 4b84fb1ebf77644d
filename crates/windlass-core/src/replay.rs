//! Replay engine and step executor ports.
//!
//! The replay engine interprets user-authored workflow code. The coordinator
//! treats it as a pure function over (run, event log, cause): it is invoked
//! in-process through this trait -- no embedded-server roundtrip -- and must
//! never be entered concurrently for the same run (the dispatcher's per-run
//! lease enforces that).

use std::time::Duration;

use windlass_types::event::RunEvent;
use windlass_types::message::ResumeCause;
use windlass_types::run::Run;

/// An instruction emitted by the replay engine describing the next action.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Schedule a durable step. `occurrence` distinguishes repeated
    /// executions of the same step name and pins the idempotency key.
    ScheduleStep {
        name: String,
        occurrence: u32,
        input: Option<serde_json::Value>,
    },
    /// Suspend the run for the given duration without consuming compute.
    Sleep { duration: Duration },
    /// Finish the run successfully.
    Complete { result: serde_json::Value },
    /// Finish the run with a failure.
    Fail { error: String },
}

/// Fault raised by the replay engine.
#[derive(Debug, thiserror::Error)]
#[error("replay engine fault: {0}")]
pub struct ReplayError(pub String);

/// Port for the workflow definition / replay engine.
///
/// `advance` must be pure with respect to already-applied events: given the
/// same (run, events, cause) it yields the same directives.
pub trait ReplayEngine: Send + Sync {
    fn advance(
        &self,
        run: &Run,
        events: &[RunEvent],
        cause: &ResumeCause,
    ) -> impl std::future::Future<Output = Result<Vec<Directive>, ReplayError>> + Send;
}

/// Output of a user step body.
#[derive(Debug, Clone)]
pub enum StepOutput {
    /// The step finished and produced a value.
    Completed(serde_json::Value),
    /// The step requests a timed wait; processing resumes after the delay
    /// via queue redelivery, not a blocking sleep.
    Defer(Duration),
}

/// Fault raised by a user step body.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StepBodyError(pub String);

/// Port for the external step body executor.
pub trait StepExecutor: Send + Sync {
    fn execute(
        &self,
        run_id: uuid::Uuid,
        step_id: &str,
        name: &str,
        input: Option<&serde_json::Value>,
    ) -> impl std::future::Future<Output = Result<StepOutput, StepBodyError>> + Send;
}
