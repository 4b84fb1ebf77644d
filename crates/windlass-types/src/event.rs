//! Append-only run event log types.
//!
//! Events form the replay log consumed by the workflow resume handler.
//! Records are never mutated or deleted, and are ordered by `created_at`
//! (UUIDv7 event IDs break ties) within a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    RunCompleted,
    RunFailed,
}

/// One append-only record in a run's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// UUIDv7 event ID (time-sortable).
    pub id: Uuid,
    /// Run this event belongs to.
    pub run_id: Uuid,
    /// Event kind.
    pub kind: EventKind,
    /// Kind-specific payload (step IDs, outputs, errors).
    pub payload: serde_json::Value,
    /// Append timestamp; ordering key within the run.
    pub created_at: DateTime<Utc>,
}

impl RunEvent {
    fn record(run_id: Uuid, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            kind,
            payload,
            created_at: Utc::now(),
        }
    }

    /// The run began executing.
    pub fn run_started(run_id: Uuid, workflow: &str) -> Self {
        Self::record(
            run_id,
            EventKind::RunStarted,
            serde_json::json!({ "workflow": workflow }),
        )
    }

    /// A step entered execution for the first time.
    pub fn step_started(run_id: Uuid, step_id: &str, attempt: u32) -> Self {
        Self::record(
            run_id,
            EventKind::StepStarted,
            serde_json::json!({ "step_id": step_id, "attempt": attempt }),
        )
    }

    /// A step committed its terminal output.
    pub fn step_completed(run_id: Uuid, step_id: &str, output: &serde_json::Value) -> Self {
        Self::record(
            run_id,
            EventKind::StepCompleted,
            serde_json::json!({ "step_id": step_id, "output": output }),
        )
    }

    /// A step exhausted its attempts and failed terminally.
    pub fn step_failed(run_id: Uuid, step_id: &str, error: &str) -> Self {
        Self::record(
            run_id,
            EventKind::StepFailed,
            serde_json::json!({ "step_id": step_id, "error": error }),
        )
    }

    /// The run completed with a result.
    pub fn run_completed(run_id: Uuid, result: &serde_json::Value) -> Self {
        Self::record(
            run_id,
            EventKind::RunCompleted,
            serde_json::json!({ "result": result }),
        )
    }

    /// The run failed terminally.
    pub fn run_failed(run_id: Uuid, error: &str) -> Self {
        Self::record(run_id, EventKind::RunFailed, serde_json::json!({ "error": error }))
    }

    /// Step ID carried in the payload, if this is a step-scoped event.
    pub fn step_id(&self) -> Option<&str> {
        self.payload.get("step_id").and_then(|v| v.as_str())
    }
}
