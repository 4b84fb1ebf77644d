//! Workflow store trait definition.
//!
//! Storage interface for runs, steps, and the append-only event log. The
//! infrastructure layer (windlass-infra) implements this trait with SQLite
//! and in-memory backends.
//!
//! All mutating operations are conditional. The boolean returns on terminal
//! commits tell the caller whether it won the commit: under duplicate
//! delivery exactly one caller sees `true` and is responsible for the
//! follow-on side effects (event append, resume enqueue).
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use uuid::Uuid;
use windlass_types::error::StoreError;
use windlass_types::event::RunEvent;
use windlass_types::run::{Run, RunStatus};
use windlass_types::step::Step;

/// Outcome of a conditional step create.
#[derive(Debug, Clone)]
pub enum StepCreate {
    /// The record was created by this call; this is the first valid
    /// delivery of the step.
    Created,
    /// A record already existed; the current state is returned.
    Existing(Step),
}

/// Repository trait for workflow persistence.
pub trait WorkflowStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Conditionally create a run record. Returns `false` if a record with
    /// this ID already exists (duplicate start delivery).
    fn create_run(
        &self,
        run: &Run,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Get a run by ID.
    fn get_run(
        &self,
        run_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Run>, StoreError>> + Send;

    /// Move a run from `Created` to `Running`. No-op if already running or
    /// terminal.
    fn mark_run_running(
        &self,
        run_id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Commit a terminal run status. Returns `false` if the run was already
    /// terminal (the caller lost the commit race and must not emit events).
    fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Conditionally create a step record keyed by `(run_id, step_id)`.
    /// Exactly one creation ever succeeds for a given key.
    fn create_step_if_absent(
        &self,
        step: &Step,
    ) -> impl std::future::Future<Output = Result<StepCreate, StoreError>> + Send;

    /// Mark a step running for the given delivery attempt.
    fn mark_step_running(
        &self,
        run_id: Uuid,
        step_id: &str,
        attempt: u32,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Mark a step deferred (sleeping until redelivery).
    fn mark_step_deferred(
        &self,
        run_id: Uuid,
        step_id: &str,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Commit a step's terminal output. Conditional on the step not being
    /// terminal yet; returns `false` if another delivery already won.
    fn complete_step(
        &self,
        run_id: Uuid,
        step_id: &str,
        output: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Commit a step's terminal failure. Conditional like `complete_step`.
    fn fail_step(
        &self,
        run_id: Uuid,
        step_id: &str,
        error: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// List all step records for a run.
    fn list_steps(
        &self,
        run_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Step>, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    /// Append one event. The log is append-only; no update or delete exists.
    fn append_event(
        &self,
        event: &RunEvent,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// List a run's events ordered by `created_at` (event ID tie-break).
    fn list_events(
        &self,
        run_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<RunEvent>, StoreError>> + Send;
}
