//! Long-running consume loop.
//!
//! Polls both queues, hands each combined batch to the dispatcher, and exits
//! on cancellation. Receive errors back off briefly instead of spinning;
//! in-flight messages simply redeliver after their visibility window.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use windlass_types::config::CoordinatorConfig;
use windlass_types::message::{MessageEnvelope, QueueName};

use crate::queue::QueueClient;
use crate::replay::{ReplayEngine, StepExecutor};
use crate::repository::{IdempotencyLedger, WorkflowStore};

use super::dispatcher::BatchDispatcher;

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Consumes the two queues until cancelled.
pub struct CoordinatorWorker<Q, S, E, X>
where
    Q: QueueClient + 'static,
    S: WorkflowStore + IdempotencyLedger + 'static,
    E: ReplayEngine + 'static,
    X: StepExecutor + 'static,
{
    queue: Arc<Q>,
    dispatcher: Arc<BatchDispatcher<Q, S, E, X>>,
    batch_size: u32,
    receive_wait_secs: u64,
    shutdown: CancellationToken,
}

impl<Q, S, E, X> CoordinatorWorker<Q, S, E, X>
where
    Q: QueueClient + 'static,
    S: WorkflowStore + IdempotencyLedger + 'static,
    E: ReplayEngine + 'static,
    X: StepExecutor + 'static,
{
    pub fn new(
        queue: Arc<Q>,
        dispatcher: Arc<BatchDispatcher<Q, S, E, X>>,
        config: &CoordinatorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            batch_size: config.batch_size,
            receive_wait_secs: config.receive_wait_secs,
            shutdown,
        }
    }

    /// Run the consume loop until the shutdown token fires.
    pub async fn run(self) {
        tracing::info!("coordinator worker started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                batch = self.receive() => {
                    if !batch.is_empty() {
                        let outcomes = self.dispatcher.dispatch(batch).await;
                        tracing::debug!(count = outcomes.len(), "batch dispatched");
                    }
                }
            }
        }
        tracing::info!("coordinator worker stopped");
    }

    /// One combined receive across both queues. Long-polling in the
    /// substrate keeps this from busy-looping when idle.
    async fn receive(&self) -> Vec<MessageEnvelope> {
        let (resumes, steps) = tokio::join!(
            self.queue
                .receive_batch(QueueName::WorkflowResume, self.batch_size, self.receive_wait_secs),
            self.queue
                .receive_batch(QueueName::StepExecution, self.batch_size, self.receive_wait_secs),
        );

        let mut batch = Vec::new();
        for (queue, received) in [
            (QueueName::WorkflowResume, resumes),
            (QueueName::StepExecution, steps),
        ] {
            match received {
                Ok(messages) => batch.extend(messages),
                Err(error) => {
                    tracing::warn!(%queue, %error, "receive failed");
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }
        batch
    }
}
