//! Client-facing coordinator surface.
//!
//! Starting a run is just an enqueue: the resume handler creates the durable
//! record on first delivery, so a crash between this call and that delivery
//! loses nothing the substrate will not redeliver.

use std::sync::Arc;

use uuid::Uuid;
use windlass_types::error::CoordinatorError;
use windlass_types::event::RunEvent;
use windlass_types::message::{MessagePayload, QueueName, ResumeCause};
use windlass_types::run::RunView;
use windlass_types::step::Step;

use crate::queue::{EnqueueOptions, QueueClient};
use crate::repository::WorkflowStore;

/// Submits runs and reads their state.
pub struct CoordinatorService<Q, S> {
    queue: Arc<Q>,
    store: Arc<S>,
}

impl<Q: QueueClient, S: WorkflowStore> CoordinatorService<Q, S> {
    pub fn new(queue: Arc<Q>, store: Arc<S>) -> Self {
        Self { queue, store }
    }

    /// Submit a new run of the named workflow. Returns the run id
    /// immediately; the run is created durably when the start message is
    /// first processed.
    pub async fn start_run(
        &self,
        workflow: impl Into<String>,
        input: Option<serde_json::Value>,
    ) -> Result<Uuid, CoordinatorError> {
        let run_id = Uuid::now_v7();
        let workflow = workflow.into();
        self.queue
            .enqueue(
                QueueName::WorkflowResume,
                MessagePayload::WorkflowResume {
                    run_id,
                    cause: ResumeCause::Start {
                        workflow: workflow.clone(),
                        input,
                    },
                },
                EnqueueOptions::grouped(run_id)
                    .with_idempotency_key(format!("run:{run_id}:start")),
            )
            .await?;
        tracing::info!(%run_id, workflow, "run submitted");
        Ok(run_id)
    }

    /// Current state of a run, if it has been created yet.
    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<RunView>, CoordinatorError> {
        Ok(self.store.get_run(run_id).await?.map(RunView::from))
    }

    /// Durable step records of a run, oldest first.
    pub async fn list_steps(&self, run_id: Uuid) -> Result<Vec<Step>, CoordinatorError> {
        Ok(self.store.list_steps(run_id).await?)
    }

    /// Event log of a run, in append order.
    pub async fn list_events(&self, run_id: Uuid) -> Result<Vec<RunEvent>, CoordinatorError> {
        Ok(self.store.list_events(run_id).await?)
    }
}
