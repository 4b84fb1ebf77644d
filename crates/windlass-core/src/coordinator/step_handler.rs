//! Step execution handler.
//!
//! Processes one step-queue message: conditionally creates the durable step
//! record, invokes the external step body, and commits the outcome. Side
//! effects are idempotent by construction -- re-running the create/started
//! phase for a duplicate delivery is a no-op past the conditional create,
//! and the terminal commit is status-guarded so exactly one delivery wins.

use std::sync::Arc;

use uuid::Uuid;
use windlass_types::error::CoordinatorError;
use windlass_types::event::{EventKind, RunEvent};
use windlass_types::message::{MessageEnvelope, MessagePayload, QueueName, ResumeCause};
use windlass_types::step::Step;

use crate::queue::{EnqueueOptions, QueueClient};
use crate::replay::{StepExecutor, StepOutput};
use crate::repository::{StepCreate, WorkflowStore};

use super::HandlerOutcome;
use super::deferral::DeferralScheduler;

/// Handles step-execution queue messages.
pub struct StepExecutionHandler<Q: QueueClient, S: WorkflowStore, X: StepExecutor> {
    queue: Arc<Q>,
    store: Arc<S>,
    executor: Arc<X>,
    deferral: Arc<DeferralScheduler<Q>>,
    max_step_attempts: u32,
}

impl<Q: QueueClient, S: WorkflowStore, X: StepExecutor> StepExecutionHandler<Q, S, X> {
    pub fn new(
        queue: Arc<Q>,
        store: Arc<S>,
        executor: Arc<X>,
        deferral: Arc<DeferralScheduler<Q>>,
        max_step_attempts: u32,
    ) -> Self {
        Self {
            queue,
            store,
            executor,
            deferral,
            max_step_attempts,
        }
    }

    /// Process one step message to an outcome.
    ///
    /// Errors bubble up only for transient faults (queue/store); the caller
    /// leaves the message unacknowledged so the substrate redelivers it.
    pub async fn handle(
        &self,
        envelope: &MessageEnvelope,
    ) -> Result<HandlerOutcome, CoordinatorError> {
        let MessagePayload::StepExecution {
            run_id,
            step_id,
            name,
            occurrence,
            input,
        } = &envelope.payload
        else {
            // A resume payload on the step queue cannot be processed here;
            // ack so it does not poison the queue.
            tracing::warn!(message_id = %envelope.id, "non-step payload on step queue");
            self.queue.acknowledge(envelope).await?;
            return Ok(HandlerOutcome::Acked);
        };
        let run_id = *run_id;

        // 1. Conditional create: exactly one record per step_id, ever.
        let record = Step::pending(run_id, name, *occurrence, input.clone());
        match self.store.create_step_if_absent(&record).await? {
            StepCreate::Created => {
                // First valid delivery: the started event is emitted once.
                self.store
                    .append_event(&RunEvent::step_started(run_id, step_id, envelope.attempt))
                    .await?;
                self.store
                    .mark_step_running(run_id, step_id, envelope.attempt)
                    .await?;
                tracing::debug!(%run_id, step_id, attempt = envelope.attempt, "step started");
            }
            StepCreate::Existing(existing) if existing.is_terminal() => {
                // Duplicate of finished work: the terminal event or the
                // outcome resume may have been lost before this redelivery.
                // Restore the event if the log lacks it, re-send the resume
                // (the resume handler dedupes), and drop the message.
                tracing::debug!(%run_id, step_id, "duplicate delivery of terminal step");
                self.ensure_step_terminal_event(run_id, &existing).await?;
                self.enqueue_outcome_resume(run_id, step_id, existing.error.is_none())
                    .await?;
                self.queue.acknowledge(envelope).await?;
                return Ok(HandlerOutcome::Acked);
            }
            StepCreate::Existing(_) => {
                // Deferred step waking up, or a retry attempt: resume
                // execution without re-emitting step_started.
                self.store
                    .mark_step_running(run_id, step_id, envelope.attempt)
                    .await?;
                tracing::debug!(%run_id, step_id, attempt = envelope.attempt, "step resumed");
            }
        }

        // 2. Invoke the external step body.
        let outcome = self
            .executor
            .execute(run_id, step_id, name, input.as_ref())
            .await;

        match outcome {
            Ok(StepOutput::Completed(output)) => {
                // Status-guarded commit: a concurrent duplicate delivery
                // loses here and just drops its message.
                if self.store.complete_step(run_id, step_id, &output).await? {
                    self.store
                        .append_event(&RunEvent::step_completed(run_id, step_id, &output))
                        .await?;
                    self.enqueue_outcome_resume(run_id, step_id, true).await?;
                    tracing::info!(%run_id, step_id, "step completed");
                } else {
                    tracing::debug!(%run_id, step_id, "lost terminal commit to duplicate");
                }
                self.queue.acknowledge(envelope).await?;
                Ok(HandlerOutcome::Acked)
            }
            Ok(StepOutput::Defer(delay)) => {
                // Timed wait: defer redelivery instead of acknowledging. No
                // terminal event is written; the same message re-enters this
                // handler after the delay.
                self.store.mark_step_deferred(run_id, step_id).await?;
                let seconds = self.deferral.defer(envelope, delay.as_secs()).await?;
                tracing::debug!(%run_id, step_id, seconds, "step deferred");
                Ok(HandlerOutcome::Deferred { seconds })
            }
            Err(body_err) => {
                if envelope.attempt < self.max_step_attempts {
                    // Transient from the run's perspective: leave the
                    // message unacknowledged and back off before redelivery.
                    let backoff = self.deferral.retry_backoff_secs(envelope.attempt);
                    self.deferral.defer(envelope, backoff).await?;
                    tracing::warn!(
                        %run_id,
                        step_id,
                        attempt = envelope.attempt,
                        max_attempts = self.max_step_attempts,
                        error = %body_err,
                        "step failed, awaiting redelivery"
                    );
                    Ok(HandlerOutcome::Redeliver)
                } else {
                    let error = body_err.to_string();
                    if self.store.fail_step(run_id, step_id, &error).await? {
                        self.store
                            .append_event(&RunEvent::step_failed(run_id, step_id, &error))
                            .await?;
                        self.enqueue_outcome_resume(run_id, step_id, false).await?;
                        tracing::warn!(%run_id, step_id, error, "step failed terminally");
                    }
                    self.queue.acknowledge(envelope).await?;
                    Ok(HandlerOutcome::Acked)
                }
            }
        }
    }

    /// Append the terminal step event if a crash between the status commit
    /// and the append left the log without one. The event log is the replay
    /// engine's ground truth, so a committed step must always be visible in
    /// it.
    async fn ensure_step_terminal_event(
        &self,
        run_id: Uuid,
        step: &Step,
    ) -> Result<(), CoordinatorError> {
        let events = self.store.list_events(run_id).await?;
        let logged = events.iter().any(|e| {
            e.step_id() == Some(step.step_id.as_str())
                && matches!(e.kind, EventKind::StepCompleted | EventKind::StepFailed)
        });
        if logged {
            return Ok(());
        }
        let event = match &step.error {
            None => RunEvent::step_completed(
                run_id,
                &step.step_id,
                step.output.as_ref().unwrap_or(&serde_json::Value::Null),
            ),
            Some(error) => RunEvent::step_failed(run_id, &step.step_id, error),
        };
        self.store.append_event(&event).await?;
        tracing::warn!(%run_id, step_id = %step.step_id, "terminal step event restored");
        Ok(())
    }

    /// Enqueue the workflow-resume message carrying this step's outcome.
    async fn enqueue_outcome_resume(
        &self,
        run_id: Uuid,
        step_id: &str,
        completed: bool,
    ) -> Result<(), CoordinatorError> {
        let cause = if completed {
            ResumeCause::StepCompleted {
                step_id: step_id.to_string(),
            }
        } else {
            ResumeCause::StepFailed {
                step_id: step_id.to_string(),
            }
        };
        self.queue
            .enqueue(
                QueueName::WorkflowResume,
                MessagePayload::WorkflowResume { run_id, cause },
                EnqueueOptions::grouped(run_id),
            )
            .await?;
        Ok(())
    }
}
