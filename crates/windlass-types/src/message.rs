//! Queue message envelope and payload types.
//!
//! The coordinator routes work through two logical queues. Payloads are an
//! internally tagged enum so a message can always be classified without
//! consulting the queue it arrived on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two logical queues the coordinator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Messages that advance a workflow run (start, step outcomes, wakes).
    WorkflowResume,
    /// Messages that execute a single durable step.
    StepExecution,
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueName::WorkflowResume => f.write_str("workflow-resume"),
            QueueName::StepExecution => f.write_str("step-execution"),
        }
    }
}

/// Why a workflow-resume message was enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResumeCause {
    /// Initial trigger: begin the run.
    Start {
        workflow: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
    },
    /// A step committed its output.
    StepCompleted { step_id: String },
    /// A step failed terminally.
    StepFailed { step_id: String },
    /// A sleep elapsed (or a hop of one; `wake_at` is the absolute target).
    Wake { wake_at: DateTime<Utc> },
}

/// Message body, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Advance a workflow run.
    WorkflowResume { run_id: Uuid, cause: ResumeCause },
    /// Execute one durable step.
    StepExecution {
        run_id: Uuid,
        step_id: String,
        name: String,
        occurrence: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
    },
}

impl MessagePayload {
    /// The run this message concerns.
    pub fn run_id(&self) -> Uuid {
        match self {
            MessagePayload::WorkflowResume { run_id, .. }
            | MessagePayload::StepExecution { run_id, .. } => *run_id,
        }
    }
}

/// A received queue message.
///
/// `attempt` is incremented by the queue substrate on every delivery, never
/// by the application. `message_id` is the substrate receipt handle and is
/// not stable across redeliveries; the domain-level `idempotency_key` is
/// authoritative for duplicate detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Stable message identity assigned at enqueue time.
    pub id: Uuid,
    /// Queue this message was received from.
    pub queue: QueueName,
    /// Substrate receipt handle for ack/extend operations.
    pub message_id: String,
    /// Delivery attempt counter (1-based).
    pub attempt: u32,
    /// Domain-level idempotency key, when the payload carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// The message body.
    pub payload: MessagePayload,
    /// When the message was first enqueued.
    pub enqueued_at: DateTime<Utc>,
}
