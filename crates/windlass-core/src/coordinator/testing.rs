//! Test doubles shared by coordinator unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;
use windlass_types::error::{QueueError, StoreError};
use windlass_types::event::RunEvent;
use windlass_types::message::{MessageEnvelope, MessagePayload, QueueName, ResumeCause};
use windlass_types::run::{Run, RunStatus};
use windlass_types::step::{Step, StepStatus, step_id, step_idempotency_key};

use crate::queue::{EnqueueOptions, QueueClient};
use crate::replay::{
    Directive, ReplayEngine, ReplayError, StepBodyError, StepExecutor, StepOutput,
};
use crate::repository::{IdempotencyLedger, LedgerEntry, StepCreate, WorkflowStore};

// ---------------------------------------------------------------------------
// RecordingQueue
// ---------------------------------------------------------------------------

/// Queue double that records every operation instead of delivering.
#[derive(Default)]
pub struct RecordingQueue {
    enqueues: Mutex<Vec<(QueueName, MessagePayload, EnqueueOptions)>>,
    acks: Mutex<Vec<Uuid>>,
    extensions: Mutex<Vec<(Uuid, u64)>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> Vec<(QueueName, MessagePayload, EnqueueOptions)> {
        self.enqueues.lock().unwrap().clone()
    }

    pub fn acked(&self) -> Vec<Uuid> {
        self.acks.lock().unwrap().clone()
    }

    pub fn extended(&self) -> Vec<(Uuid, u64)> {
        self.extensions.lock().unwrap().clone()
    }
}

impl QueueClient for RecordingQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: MessagePayload,
        opts: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        self.enqueues.lock().unwrap().push((queue, payload, opts));
        Ok(Uuid::now_v7())
    }

    async fn receive_batch(
        &self,
        _queue: QueueName,
        _max_messages: u32,
        _wait_secs: u64,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        Ok(Vec::new())
    }

    async fn acknowledge(&self, envelope: &MessageEnvelope) -> Result<(), QueueError> {
        self.acks.lock().unwrap().push(envelope.id);
        Ok(())
    }

    async fn extend_invisibility(
        &self,
        envelope: &MessageEnvelope,
        seconds: u64,
    ) -> Result<(), QueueError> {
        self.extensions.lock().unwrap().push((envelope.id, seconds));
        Ok(())
    }

    fn max_extension_secs(&self) -> u64 {
        900
    }
}

// ---------------------------------------------------------------------------
// MemStore
// ---------------------------------------------------------------------------

/// In-memory store + ledger with the same conditional semantics the real
/// backends implement.
#[derive(Default)]
pub struct MemStore {
    runs: Mutex<HashMap<Uuid, Run>>,
    steps: Mutex<HashMap<(Uuid, String), Step>>,
    events: Mutex<Vec<RunEvent>>,
    ledger: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_of_kind(&self, run_id: Uuid, kind: windlass_types::event::EventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.run_id == run_id && e.kind == kind)
            .count()
    }
}

impl WorkflowStore for MemStore {
    async fn create_run(&self, run: &Run) -> Result<bool, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        if runs.contains_key(&run.id) {
            return Ok(false);
        }
        runs.insert(run.id, run.clone());
        Ok(true)
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.lock().unwrap().get(&run_id).cloned())
    }

    async fn mark_run_running(&self, run_id: Uuid) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.get_mut(&run_id) {
            if run.status == RunStatus::Created {
                run.status = RunStatus::Running;
            }
        }
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(&run_id).ok_or(StoreError::NotFound)?;
        if run.is_terminal() {
            return Ok(false);
        }
        run.status = status;
        run.result = result.cloned();
        run.error = error.map(str::to_string);
        run.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn create_step_if_absent(&self, step: &Step) -> Result<StepCreate, StoreError> {
        let mut steps = self.steps.lock().unwrap();
        let key = (step.run_id, step.step_id.clone());
        if let Some(existing) = steps.get(&key) {
            return Ok(StepCreate::Existing(existing.clone()));
        }
        steps.insert(key, step.clone());
        Ok(StepCreate::Created)
    }

    async fn mark_step_running(
        &self,
        run_id: Uuid,
        step_id: &str,
        attempt: u32,
    ) -> Result<(), StoreError> {
        let mut steps = self.steps.lock().unwrap();
        if let Some(step) = steps.get_mut(&(run_id, step_id.to_string())) {
            if !step.is_terminal() {
                step.status = StepStatus::Running;
                step.attempt = attempt;
            }
        }
        Ok(())
    }

    async fn mark_step_deferred(&self, run_id: Uuid, step_id: &str) -> Result<(), StoreError> {
        let mut steps = self.steps.lock().unwrap();
        if let Some(step) = steps.get_mut(&(run_id, step_id.to_string())) {
            if !step.is_terminal() {
                step.status = StepStatus::Deferred;
            }
        }
        Ok(())
    }

    async fn complete_step(
        &self,
        run_id: Uuid,
        step_id: &str,
        output: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        let mut steps = self.steps.lock().unwrap();
        let step = steps
            .get_mut(&(run_id, step_id.to_string()))
            .ok_or(StoreError::NotFound)?;
        if step.is_terminal() {
            return Ok(false);
        }
        step.status = StepStatus::Completed;
        step.output = Some(output.clone());
        step.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn fail_step(
        &self,
        run_id: Uuid,
        step_id: &str,
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut steps = self.steps.lock().unwrap();
        let step = steps
            .get_mut(&(run_id, step_id.to_string()))
            .ok_or(StoreError::NotFound)?;
        if step.is_terminal() {
            return Ok(false);
        }
        step.status = StepStatus::Failed;
        step.error = Some(error.to_string());
        step.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn list_steps(&self, run_id: Uuid) -> Result<Vec<Step>, StoreError> {
        let mut steps: Vec<Step> = self
            .steps
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(steps)
    }

    async fn append_event(&self, event: &RunEvent) -> Result<(), StoreError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn list_events(&self, run_id: Uuid) -> Result<Vec<RunEvent>, StoreError> {
        let mut events: Vec<RunEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(events)
    }
}

impl IdempotencyLedger for MemStore {
    async fn create_if_absent(
        &self,
        key: &str,
        record: &serde_json::Value,
    ) -> Result<LedgerEntry, StoreError> {
        let mut ledger = self.ledger.lock().unwrap();
        if let Some(existing) = ledger.get(key) {
            return Ok(LedgerEntry {
                created: false,
                record: existing.clone(),
            });
        }
        ledger.insert(key.to_string(), record.clone());
        Ok(LedgerEntry {
            created: true,
            record: record.clone(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.ledger.lock().unwrap().get(key).cloned())
    }
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// Store wrapper that fails the first `n` terminal run commits, simulating a
/// transient store fault between the ledger marker and the status update.
pub struct FlakyStore {
    pub inner: MemStore,
    finish_failures: AtomicU32,
}

impl FlakyStore {
    pub fn failing_finish_runs(n: u32) -> Self {
        Self {
            inner: MemStore::new(),
            finish_failures: AtomicU32::new(n),
        }
    }
}

impl WorkflowStore for FlakyStore {
    async fn create_run(&self, run: &Run) -> Result<bool, StoreError> {
        self.inner.create_run(run).await
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        self.inner.get_run(run_id).await
    }

    async fn mark_run_running(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.inner.mark_run_running(run_id).await
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        if self.finish_failures.load(Ordering::SeqCst) > 0 {
            self.finish_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Connection);
        }
        self.inner.finish_run(run_id, status, result, error).await
    }

    async fn create_step_if_absent(&self, step: &Step) -> Result<StepCreate, StoreError> {
        self.inner.create_step_if_absent(step).await
    }

    async fn mark_step_running(
        &self,
        run_id: Uuid,
        step_id: &str,
        attempt: u32,
    ) -> Result<(), StoreError> {
        self.inner.mark_step_running(run_id, step_id, attempt).await
    }

    async fn mark_step_deferred(&self, run_id: Uuid, step_id: &str) -> Result<(), StoreError> {
        self.inner.mark_step_deferred(run_id, step_id).await
    }

    async fn complete_step(
        &self,
        run_id: Uuid,
        step_id: &str,
        output: &serde_json::Value,
    ) -> Result<bool, StoreError> {
        self.inner.complete_step(run_id, step_id, output).await
    }

    async fn fail_step(&self, run_id: Uuid, step_id: &str, error: &str) -> Result<bool, StoreError> {
        self.inner.fail_step(run_id, step_id, error).await
    }

    async fn list_steps(&self, run_id: Uuid) -> Result<Vec<Step>, StoreError> {
        self.inner.list_steps(run_id).await
    }

    async fn append_event(&self, event: &RunEvent) -> Result<(), StoreError> {
        self.inner.append_event(event).await
    }

    async fn list_events(&self, run_id: Uuid) -> Result<Vec<RunEvent>, StoreError> {
        self.inner.list_events(run_id).await
    }
}

impl IdempotencyLedger for FlakyStore {
    async fn create_if_absent(
        &self,
        key: &str,
        record: &serde_json::Value,
    ) -> Result<LedgerEntry, StoreError> {
        self.inner.create_if_absent(key, record).await
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.inner.get(key).await
    }
}

// ---------------------------------------------------------------------------
// Engines and executors
// ---------------------------------------------------------------------------

/// Replay engine that always yields the same directives.
pub struct StaticEngine(pub Vec<Directive>);

impl ReplayEngine for StaticEngine {
    async fn advance(
        &self,
        _run: &Run,
        _events: &[RunEvent],
        _cause: &ResumeCause,
    ) -> Result<Vec<Directive>, ReplayError> {
        Ok(self.0.clone())
    }
}

/// Replay engine that always faults.
pub struct FaultingEngine;

impl ReplayEngine for FaultingEngine {
    async fn advance(
        &self,
        _run: &Run,
        _events: &[RunEvent],
        _cause: &ResumeCause,
    ) -> Result<Vec<Directive>, ReplayError> {
        Err(ReplayError("interpreter exploded".to_string()))
    }
}

/// Step executor that always completes with a fixed value.
pub struct OkExecutor(pub serde_json::Value);

impl StepExecutor for OkExecutor {
    async fn execute(
        &self,
        _run_id: Uuid,
        _step_id: &str,
        _name: &str,
        _input: Option<&serde_json::Value>,
    ) -> Result<StepOutput, StepBodyError> {
        Ok(StepOutput::Completed(self.0.clone()))
    }
}

/// Step executor that always fails.
pub struct FailExecutor(pub String);

impl StepExecutor for FailExecutor {
    async fn execute(
        &self,
        _run_id: Uuid,
        _step_id: &str,
        _name: &str,
        _input: Option<&serde_json::Value>,
    ) -> Result<StepOutput, StepBodyError> {
        Err(StepBodyError(self.0.clone()))
    }
}

/// Step executor that requests a timed wait.
pub struct DeferExecutor(pub Duration);

impl StepExecutor for DeferExecutor {
    async fn execute(
        &self,
        _run_id: Uuid,
        _step_id: &str,
        _name: &str,
        _input: Option<&serde_json::Value>,
    ) -> Result<StepOutput, StepBodyError> {
        Ok(StepOutput::Defer(self.0))
    }
}

// ---------------------------------------------------------------------------
// Envelope builders
// ---------------------------------------------------------------------------

pub fn step_envelope(run_id: Uuid, name: &str, occurrence: u32, attempt: u32) -> MessageEnvelope {
    MessageEnvelope {
        id: Uuid::now_v7(),
        queue: QueueName::StepExecution,
        message_id: format!("receipt-{}", Uuid::now_v7()),
        attempt,
        idempotency_key: Some(step_idempotency_key(run_id, name, occurrence)),
        payload: MessagePayload::StepExecution {
            run_id,
            step_id: step_id(name, occurrence),
            name: name.to_string(),
            occurrence,
            input: None,
        },
        enqueued_at: Utc::now(),
    }
}

pub fn resume_envelope(run_id: Uuid, cause: ResumeCause, attempt: u32) -> MessageEnvelope {
    MessageEnvelope {
        id: Uuid::now_v7(),
        queue: QueueName::WorkflowResume,
        message_id: format!("receipt-{}", Uuid::now_v7()),
        attempt,
        idempotency_key: None,
        payload: MessagePayload::WorkflowResume { run_id, cause },
        enqueued_at: Utc::now(),
    }
}
