//! Batch dispatcher.
//!
//! Routes a received batch to the two handlers with different concurrency
//! disciplines: step messages run concurrently under a semaphore, workflow
//! resume messages run one at a time in receipt order, each holding the
//! per-run lease for the whole replay-and-commit section.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;
use windlass_types::error::{CoordinatorError, QueueError};
use windlass_types::message::{MessageEnvelope, QueueName};

use crate::queue::QueueClient;
use crate::replay::{ReplayEngine, StepExecutor};
use crate::repository::{IdempotencyLedger, WorkflowStore};

use super::lease::RunLeases;
use super::resume_handler::WorkflowResumeHandler;
use super::step_handler::StepExecutionHandler;
use super::HandlerOutcome;

/// Disposition of one dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Handled(HandlerOutcome),
    /// The handler returned an error; the message was left unacknowledged
    /// for redelivery.
    Failed(String),
}

/// Per-message dispatch result.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub message_id: Uuid,
    pub queue: QueueName,
    pub outcome: MessageOutcome,
}

/// Routes message batches to the step and resume handlers.
pub struct BatchDispatcher<Q, S, E, X>
where
    Q: QueueClient + 'static,
    S: WorkflowStore + IdempotencyLedger + 'static,
    E: ReplayEngine + 'static,
    X: StepExecutor + 'static,
{
    steps: Arc<StepExecutionHandler<Q, S, X>>,
    resumes: Arc<WorkflowResumeHandler<Q, S, E>>,
    store: Arc<S>,
    leases: Arc<RunLeases>,
    step_permits: Arc<Semaphore>,
}

impl<Q, S, E, X> BatchDispatcher<Q, S, E, X>
where
    Q: QueueClient + 'static,
    S: WorkflowStore + IdempotencyLedger + 'static,
    E: ReplayEngine + 'static,
    X: StepExecutor + 'static,
{
    pub fn new(
        steps: Arc<StepExecutionHandler<Q, S, X>>,
        resumes: Arc<WorkflowResumeHandler<Q, S, E>>,
        store: Arc<S>,
        leases: Arc<RunLeases>,
        step_concurrency: usize,
    ) -> Self {
        Self {
            steps,
            resumes,
            store,
            leases,
            step_permits: Arc::new(Semaphore::new(step_concurrency.max(1))),
        }
    }

    /// Dispatch one batch and return a disposition per message.
    ///
    /// Handler errors are absorbed into [`MessageOutcome::Failed`]; the
    /// message stays unacknowledged and the substrate redelivers it.
    pub async fn dispatch(&self, batch: Vec<MessageEnvelope>) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(batch.len());
        let mut resumes = Vec::new();
        let mut tasks = JoinSet::new();

        for envelope in batch {
            match envelope.queue {
                QueueName::StepExecution => {
                    let handler = Arc::clone(&self.steps);
                    let permits = Arc::clone(&self.step_permits);
                    tasks.spawn(async move {
                        let permit = permits.acquire_owned().await;
                        let result = match permit {
                            Ok(_permit) => handler.handle(&envelope).await,
                            Err(_) => Err(CoordinatorError::Queue(QueueError::Closed)),
                        };
                        (envelope, result)
                    });
                }
                QueueName::WorkflowResume => resumes.push(envelope),
            }
        }

        // Resumes stay on this task: receipt order within the batch, and the
        // lease keeps concurrent batches out of the same run's replay.
        for envelope in resumes {
            let run_id = envelope.payload.run_id();
            let guard = self.leases.acquire(run_id).await;
            let result = self.resumes.handle(&envelope).await;
            drop(guard);
            if matches!(result, Ok(HandlerOutcome::Acked)) {
                self.trim_lease(run_id).await;
            }
            outcomes.push(Self::disposition(envelope, result));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((envelope, result)) => outcomes.push(Self::disposition(envelope, result)),
                Err(join_error) => {
                    // The message stays invisible until its window lapses,
                    // then redelivers.
                    tracing::error!(error = %join_error, "step task panicked");
                }
            }
        }

        outcomes
    }

    /// Drop the lease entry once a run is terminal.
    ///
    /// Removal is deferred to terminal runs only: a late resume racing the
    /// removal sees the terminal status and acks before ever reaching the
    /// replay engine, so losing mutual exclusion here is harmless.
    async fn trim_lease(&self, run_id: Uuid) {
        match self.store.get_run(run_id).await {
            Ok(Some(run)) if run.is_terminal() => self.leases.release(run_id),
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(%run_id, %error, "lease trim skipped");
            }
        }
    }

    fn disposition(
        envelope: MessageEnvelope,
        result: Result<HandlerOutcome, CoordinatorError>,
    ) -> DispatchOutcome {
        let outcome = match result {
            Ok(handled) => MessageOutcome::Handled(handled),
            Err(error) => {
                tracing::error!(
                    message_id = %envelope.id,
                    queue = %envelope.queue,
                    error = %error,
                    "handler error, leaving message for redelivery"
                );
                MessageOutcome::Failed(error.to_string())
            }
        };
        DispatchOutcome {
            message_id: envelope.id,
            queue: envelope.queue,
            outcome,
        }
    }
}
