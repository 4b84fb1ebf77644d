//! Durable step types.
//!
//! A `Step` is one durable unit of work within a run, individually
//! retryable. Step identity is the domain-level pair `(run_id, step_id)`
//! where `step_id` is derived from the step name and its occurrence index,
//! so redeliveries and replays always converge on the same record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an individual durable step.
///
/// Transitions are monotonic (Pending -> Running -> Completed/Failed)
/// except `Deferred -> Running` when a sleeping step wakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Deferred,
    Completed,
    Failed,
}

impl StepStatus {
    /// Whether the step has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

/// A durable step record within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Parent run ID.
    pub run_id: Uuid,
    /// Step ID, unique within the run. Derived via [`step_id`].
    pub step_id: String,
    /// Logical step name as known to the workflow definition.
    pub name: String,
    /// Current step status.
    pub status: StepStatus,
    /// Delivery attempt that last touched this record (1-based, counted by
    /// the queue substrate, never by the application).
    pub attempt: u32,
    /// Idempotency key guaranteeing at-most-once application. Stable across
    /// redeliveries; derived via [`step_idempotency_key`].
    pub idempotency_key: String,
    /// JSON input passed to the step body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// JSON output produced on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Error message if the step failed terminally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the record was created (first valid delivery).
    pub created_at: DateTime<Utc>,
    /// When the step reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    /// Build a pending step record for the given logical position.
    pub fn pending(
        run_id: Uuid,
        name: &str,
        occurrence: u32,
        input: Option<serde_json::Value>,
    ) -> Self {
        Self {
            run_id,
            step_id: step_id(name, occurrence),
            name: name.to_string(),
            status: StepStatus::Pending,
            attempt: 0,
            idempotency_key: step_idempotency_key(run_id, name, occurrence),
            input,
            output: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the step has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Derive the step ID for a logical step occurrence within a run.
///
/// The occurrence index distinguishes repeated executions of the same step
/// name (loops), keeping step IDs unique within the run.
pub fn step_id(name: &str, occurrence: u32) -> String {
    format!("{name}#{occurrence}")
}

/// Derive the domain-level idempotency key for a step occurrence.
///
/// This key, not the substrate's delivery ID, is authoritative for duplicate
/// detection: delivery IDs are not stable across redeliveries in all
/// substrates.
pub fn step_idempotency_key(run_id: Uuid, name: &str, occurrence: u32) -> String {
    format!("{run_id}:{name}#{occurrence}")
}
