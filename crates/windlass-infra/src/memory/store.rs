//! In-memory workflow store and idempotency ledger.
//!
//! Implements the same conditional-write contract as the SQLite backend,
//! for embedded use and tests. Runs, steps and ledger entries live in
//! concurrent maps; the event log is an append-only vector.

use std::sync::Mutex;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;
use windlass_core::repository::{IdempotencyLedger, LedgerEntry, StepCreate, WorkflowStore};
use windlass_types::error::StoreError;
use windlass_types::event::RunEvent;
use windlass_types::run::{Run, RunStatus};
use windlass_types::step::{Step, StepStatus};

/// In-process [`WorkflowStore`] and [`IdempotencyLedger`].
#[derive(Default)]
pub struct MemoryStore {
    runs: DashMap<Uuid, Run>,
    steps: DashMap<(Uuid, String), Step>,
    events: Mutex<Vec<RunEvent>>,
    ledger: DashMap<String, serde_json::Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowStore for MemoryStore {
    async fn create_run(&self, run: &Run) -> Result<bool, StoreError> {
        match self.runs.entry(run.id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
                Ok(true)
            }
        }
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.get(&run_id).map(|r| r.clone()))
    }

    async fn mark_run_running(&self, run_id: Uuid) -> Result<(), StoreError> {
        if let Some(mut run) = self.runs.get_mut(&run_id) {
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
        let mut run = self.runs.get_mut(&run_id).ok_or(StoreError::NotFound)?;
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
        match self.steps.entry((step.run_id, step.step_id.clone())) {
            Entry::Occupied(slot) => Ok(StepCreate::Existing(slot.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(step.clone());
                Ok(StepCreate::Created)
            }
        }
    }

    async fn mark_step_running(
        &self,
        run_id: Uuid,
        step_id: &str,
        attempt: u32,
    ) -> Result<(), StoreError> {
        if let Some(mut step) = self.steps.get_mut(&(run_id, step_id.to_string())) {
            if !step.is_terminal() {
                step.status = StepStatus::Running;
                step.attempt = attempt;
            }
        }
        Ok(())
    }

    async fn mark_step_deferred(&self, run_id: Uuid, step_id: &str) -> Result<(), StoreError> {
        if let Some(mut step) = self.steps.get_mut(&(run_id, step_id.to_string())) {
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
        let mut step = self
            .steps
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

    async fn fail_step(&self, run_id: Uuid, step_id: &str, error: &str) -> Result<bool, StoreError> {
        let mut step = self
            .steps
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
            .iter()
            .filter(|entry| entry.key().0 == run_id)
            .map(|entry| entry.value().clone())
            .collect();
        steps.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.step_id.cmp(&b.step_id)));
        Ok(steps)
    }

    async fn append_event(&self, event: &RunEvent) -> Result<(), StoreError> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }

    async fn list_events(&self, run_id: Uuid) -> Result<Vec<RunEvent>, StoreError> {
        Ok(self
            .events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }
}

impl IdempotencyLedger for MemoryStore {
    async fn create_if_absent(
        &self,
        key: &str,
        record: &serde_json::Value,
    ) -> Result<LedgerEntry, StoreError> {
        match self.ledger.entry(key.to_string()) {
            Entry::Occupied(slot) => Ok(LedgerEntry {
                created: false,
                record: slot.get().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(LedgerEntry {
                    created: true,
                    record: record.clone(),
                })
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.ledger.get(key).map(|v| v.clone()))
    }
}
