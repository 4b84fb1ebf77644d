//! Workflow resume handler.
//!
//! Processes one workflow-queue message: loads the run and its event log,
//! feeds the replay engine, and translates the resulting directives into
//! step messages, wake messages, or the run's guarded terminal transition.
//! The caller must hold the per-run lease for the whole invocation.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use windlass_types::error::CoordinatorError;
use windlass_types::event::{EventKind, RunEvent};
use windlass_types::message::{MessageEnvelope, MessagePayload, QueueName, ResumeCause};
use windlass_types::run::{Run, RunStatus};
use windlass_types::step::{Step, StepStatus, step_idempotency_key};

use crate::queue::{EnqueueOptions, QueueClient};
use crate::replay::{Directive, ReplayEngine};
use crate::repository::ledger::run_terminal_key;
use crate::repository::{IdempotencyLedger, StepCreate, WorkflowStore};

use super::HandlerOutcome;
use super::deferral::DeferralScheduler;

/// Handles workflow-resume queue messages.
pub struct WorkflowResumeHandler<Q, S, E>
where
    Q: QueueClient,
    S: WorkflowStore + IdempotencyLedger,
    E: ReplayEngine,
{
    queue: Arc<Q>,
    store: Arc<S>,
    engine: Arc<E>,
    deferral: Arc<DeferralScheduler<Q>>,
    max_replay_attempts: u32,
}

impl<Q, S, E> WorkflowResumeHandler<Q, S, E>
where
    Q: QueueClient,
    S: WorkflowStore + IdempotencyLedger,
    E: ReplayEngine,
{
    pub fn new(
        queue: Arc<Q>,
        store: Arc<S>,
        engine: Arc<E>,
        deferral: Arc<DeferralScheduler<Q>>,
        max_replay_attempts: u32,
    ) -> Self {
        Self {
            queue,
            store,
            engine,
            deferral,
            max_replay_attempts,
        }
    }

    /// Process one resume message to an outcome. The caller holds the
    /// per-run lease.
    pub async fn handle(
        &self,
        envelope: &MessageEnvelope,
    ) -> Result<HandlerOutcome, CoordinatorError> {
        let MessagePayload::WorkflowResume { run_id, cause } = &envelope.payload else {
            tracing::warn!(message_id = %envelope.id, "non-resume payload on workflow queue");
            self.queue.acknowledge(envelope).await?;
            return Ok(HandlerOutcome::Acked);
        };
        let run_id = *run_id;

        // A wake hop that arrived early is re-deferred by the remaining
        // time; the replay engine is not entered.
        if let ResumeCause::Wake { wake_at } = cause {
            let remaining = (*wake_at - Utc::now()).num_seconds();
            if remaining > 0 {
                let seconds = self.deferral.defer(envelope, remaining as u64).await?;
                tracing::debug!(%run_id, remaining, seconds, "wake hop re-deferred");
                return Ok(HandlerOutcome::Deferred { seconds });
            }
        }

        // Start is the only cause that creates the run; the conditional
        // create makes duplicate start deliveries a no-op.
        if let ResumeCause::Start { workflow, input } = cause {
            let run = Run::new(run_id, workflow.clone(), input.clone());
            if self.store.create_run(&run).await? {
                self.store
                    .append_event(&RunEvent::run_started(run_id, workflow))
                    .await?;
                self.store.mark_run_running(run_id).await?;
                tracing::info!(%run_id, workflow = workflow.as_str(), "run started");
            } else {
                tracing::debug!(%run_id, "duplicate start delivery");
            }
        }

        // A resume for a run that was never created is foreign or corrupt;
        // redelivering it forever would never change that.
        let Some(run) = self.store.get_run(run_id).await? else {
            tracing::warn!(message_id = %envelope.id, %run_id, "resume for unknown run");
            self.queue.acknowledge(envelope).await?;
            return Ok(HandlerOutcome::Acked);
        };

        // Late or duplicate message for a finished run.
        if run.is_terminal() {
            tracing::debug!(%run_id, status = ?run.status, "resume for terminal run");
            self.ensure_run_terminal_event(&run).await?;
            self.queue.acknowledge(envelope).await?;
            return Ok(HandlerOutcome::Acked);
        }

        let events = self.store.list_events(run_id).await?;

        let directives = match self.engine.advance(&run, &events, cause).await {
            Ok(directives) => directives,
            Err(fault) => {
                if envelope.attempt < self.max_replay_attempts {
                    let backoff = self.deferral.retry_backoff_secs(envelope.attempt);
                    self.deferral.defer(envelope, backoff).await?;
                    tracing::warn!(
                        %run_id,
                        attempt = envelope.attempt,
                        error = %fault,
                        "replay fault, awaiting redelivery"
                    );
                    return Ok(HandlerOutcome::Redeliver);
                }
                // Retry ceiling reached: force the run to failed.
                let error = format!("replay fault: {fault}");
                self.finish(run_id, RunStatus::Failed, None, Some(error.as_str()))
                    .await?;
                tracing::error!(%run_id, error, "run forced to failed after replay faults");
                self.queue.acknowledge(envelope).await?;
                return Ok(HandlerOutcome::Acked);
            }
        };

        for directive in directives {
            match directive {
                Directive::ScheduleStep {
                    name,
                    occurrence,
                    input,
                } => {
                    self.schedule_step(run_id, &name, occurrence, input).await?;
                }
                Directive::Sleep { duration } => {
                    self.deferral.schedule_wake(run_id, duration).await?;
                    tracing::debug!(%run_id, secs = duration.as_secs(), "run sleeping");
                }
                Directive::Complete { result } => {
                    self.finish(run_id, RunStatus::Completed, Some(&result), None)
                        .await?;
                }
                Directive::Fail { error } => {
                    self.finish(run_id, RunStatus::Failed, None, Some(error.as_str()))
                        .await?;
                }
            }
        }

        self.queue.acknowledge(envelope).await?;
        Ok(HandlerOutcome::Acked)
    }

    /// Conditionally create a step record and enqueue its execution message.
    ///
    /// The deterministic idempotency key means repeated replay of the same
    /// logical point converges on one record. The message is re-enqueued
    /// while the record is still Pending to cover a crash between create and
    /// enqueue; once the step has started it is never scheduled again.
    async fn schedule_step(
        &self,
        run_id: Uuid,
        name: &str,
        occurrence: u32,
        input: Option<serde_json::Value>,
    ) -> Result<(), CoordinatorError> {
        let step = Step::pending(run_id, name, occurrence, input.clone());
        let step_id = step.step_id.clone();
        let key = step_idempotency_key(run_id, name, occurrence);

        let enqueue = match self.store.create_step_if_absent(&step).await? {
            StepCreate::Created => {
                tracing::debug!(%run_id, step_id, "step scheduled");
                true
            }
            StepCreate::Existing(existing) => existing.status == StepStatus::Pending,
        };

        if enqueue {
            self.queue
                .enqueue(
                    QueueName::StepExecution,
                    MessagePayload::StepExecution {
                        run_id,
                        step_id,
                        name: name.to_string(),
                        occurrence,
                        input,
                    },
                    EnqueueOptions::default().with_idempotency_key(key),
                )
                .await?;
        }
        Ok(())
    }

    /// Commit a terminal run transition, guarded against double-completion.
    ///
    /// The ledger marker records the intended transition; the status-guarded
    /// update picks exactly one winner. The marker must not gate the update:
    /// a delivery can crash between the two writes, and its redelivery still
    /// has to drive the run to the terminal status.
    async fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        result: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        let marker = serde_json::json!({
            "status": status,
            "error": error,
        });
        let entry = self
            .store
            .create_if_absent(&run_terminal_key(run_id), &marker)
            .await?;
        if !entry.created {
            tracing::debug!(%run_id, "terminal marker already present");
        }

        if self.store.finish_run(run_id, status, result, error).await? {
            let event = match status {
                RunStatus::Completed => RunEvent::run_completed(
                    run_id,
                    result.unwrap_or(&serde_json::Value::Null),
                ),
                _ => RunEvent::run_failed(run_id, error.unwrap_or("unknown error")),
            };
            self.store.append_event(&event).await?;
            tracing::info!(%run_id, status = ?status, "run finished");
        }
        Ok(())
    }

    /// Append the terminal run event if a crash between the status commit
    /// and the append left the log without one.
    async fn ensure_run_terminal_event(&self, run: &Run) -> Result<(), CoordinatorError> {
        let events = self.store.list_events(run.id).await?;
        let logged = events
            .iter()
            .any(|e| matches!(e.kind, EventKind::RunCompleted | EventKind::RunFailed));
        if logged {
            return Ok(());
        }
        let event = match run.status {
            RunStatus::Completed => RunEvent::run_completed(
                run.id,
                run.result.as_ref().unwrap_or(&serde_json::Value::Null),
            ),
            _ => RunEvent::run_failed(run.id, run.error.as_deref().unwrap_or("unknown error")),
        };
        self.store.append_event(&event).await?;
        tracing::warn!(run_id = %run.id, "terminal run event restored from run state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing::{
        FaultingEngine, FlakyStore, MemStore, RecordingQueue, StaticEngine, resume_envelope,
    };
    use serde_json::json;
    use std::time::Duration;
    use windlass_types::config::CoordinatorConfig;
    use windlass_types::event::EventKind;

    fn handler<E: ReplayEngine>(
        engine: E,
    ) -> (
        WorkflowResumeHandler<RecordingQueue, MemStore, E>,
        Arc<RecordingQueue>,
        Arc<MemStore>,
    ) {
        let queue = Arc::new(RecordingQueue::new());
        let store = Arc::new(MemStore::new());
        let deferral = Arc::new(DeferralScheduler::new(
            Arc::clone(&queue),
            &CoordinatorConfig::default(),
        ));
        let handler = WorkflowResumeHandler::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::new(engine),
            deferral,
            5,
        );
        (handler, queue, store)
    }

    fn start_cause() -> ResumeCause {
        ResumeCause::Start {
            workflow: "daily-report".to_string(),
            input: None,
        }
    }

    #[tokio::test]
    async fn start_creates_run_and_schedules_step() {
        let (handler, queue, store) = handler(StaticEngine(vec![Directive::ScheduleStep {
            name: "fetch".to_string(),
            occurrence: 0,
            input: Some(json!({"url": "x"})),
        }]));
        let run_id = Uuid::now_v7();

        let outcome = handler
            .handle(&resume_envelope(run_id, start_cause(), 1))
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Acked);

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(store.events_of_kind(run_id, EventKind::RunStarted), 1);

        let enqueued = queue.enqueued();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].0, QueueName::StepExecution);
        assert!(matches!(
            &enqueued[0].1,
            MessagePayload::StepExecution { step_id, .. } if step_id == "fetch#0"
        ));
        // Step record created pending before the enqueue.
        let steps = store.list_steps(run_id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_start_does_not_restart_run() {
        let (handler, _queue, store) = handler(StaticEngine(vec![]));
        let run_id = Uuid::now_v7();

        handler
            .handle(&resume_envelope(run_id, start_cause(), 1))
            .await
            .unwrap();
        handler
            .handle(&resume_envelope(run_id, start_cause(), 2))
            .await
            .unwrap();

        assert_eq!(store.events_of_kind(run_id, EventKind::RunStarted), 1);
    }

    #[tokio::test]
    async fn repeated_schedule_does_not_double_schedule_started_step() {
        let directive = Directive::ScheduleStep {
            name: "fetch".to_string(),
            occurrence: 0,
            input: None,
        };
        let (handler, queue, store) = handler(StaticEngine(vec![directive]));
        let run_id = Uuid::now_v7();

        handler
            .handle(&resume_envelope(run_id, start_cause(), 1))
            .await
            .unwrap();
        // The step has started executing in the meantime.
        store.mark_step_running(run_id, "fetch#0", 1).await.unwrap();
        handler
            .handle(&resume_envelope(run_id, start_cause(), 2))
            .await
            .unwrap();

        let step_messages = queue
            .enqueued()
            .into_iter()
            .filter(|(q, _, _)| *q == QueueName::StepExecution)
            .count();
        assert_eq!(step_messages, 1);
        assert_eq!(store.list_steps(run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn complete_directive_finishes_run_once() {
        let (handler, _queue, store) = handler(StaticEngine(vec![Directive::Complete {
            result: json!({"sent": 2}),
        }]));
        let run_id = Uuid::now_v7();

        handler
            .handle(&resume_envelope(run_id, start_cause(), 1))
            .await
            .unwrap();
        // Duplicate delivery of the same logical resume.
        handler
            .handle(&resume_envelope(run_id, start_cause(), 2))
            .await
            .unwrap();

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.result, Some(json!({"sent": 2})));
        assert_eq!(store.events_of_kind(run_id, EventKind::RunCompleted), 1);
    }

    #[tokio::test]
    async fn sleep_directive_enqueues_wake() {
        let (handler, queue, _store) = handler(StaticEngine(vec![Directive::Sleep {
            duration: Duration::from_secs(3600),
        }]));
        let run_id = Uuid::now_v7();

        handler
            .handle(&resume_envelope(run_id, start_cause(), 1))
            .await
            .unwrap();

        let enqueued = queue.enqueued();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].0, QueueName::WorkflowResume);
        assert!(matches!(
            &enqueued[0].1,
            MessagePayload::WorkflowResume {
                cause: ResumeCause::Wake { .. },
                ..
            }
        ));
        // Clamped first hop (default window 900s).
        assert_eq!(enqueued[0].2.delay_secs, 900);
    }

    #[tokio::test]
    async fn early_wake_is_redeferred_without_replay() {
        // A faulting engine proves replay is never entered for early wakes.
        let (handler, queue, _store) = handler(FaultingEngine);
        let run_id = Uuid::now_v7();
        let wake = ResumeCause::Wake {
            wake_at: Utc::now() + chrono::Duration::seconds(600),
        };

        let outcome = handler
            .handle(&resume_envelope(run_id, wake, 1))
            .await
            .unwrap();
        assert!(matches!(outcome, HandlerOutcome::Deferred { .. }));
        assert!(queue.acked().is_empty());
        assert_eq!(queue.extended().len(), 1);
    }

    #[tokio::test]
    async fn replay_fault_below_ceiling_redelivers() {
        let (handler, queue, store) = handler(FaultingEngine);
        let run_id = Uuid::now_v7();

        let outcome = handler
            .handle(&resume_envelope(run_id, start_cause(), 1))
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Redeliver);
        assert!(queue.acked().is_empty());

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn replay_fault_at_ceiling_forces_run_failed() {
        let (handler, queue, store) = handler(FaultingEngine);
        let run_id = Uuid::now_v7();

        let outcome = handler
            .handle(&resume_envelope(run_id, start_cause(), 5))
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Acked);
        assert_eq!(queue.acked().len(), 1);

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("replay fault"));
        assert_eq!(store.events_of_kind(run_id, EventKind::RunFailed), 1);
    }

    #[tokio::test]
    async fn resume_for_terminal_run_is_acked() {
        let (handler, queue, store) = handler(StaticEngine(vec![Directive::Complete {
            result: json!(null),
        }]));
        let run_id = Uuid::now_v7();

        handler
            .handle(&resume_envelope(run_id, start_cause(), 1))
            .await
            .unwrap();
        let outcome = handler
            .handle(&resume_envelope(
                run_id,
                ResumeCause::StepCompleted {
                    step_id: "fetch#0".to_string(),
                },
                1,
            ))
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Acked);
        assert_eq!(store.events_of_kind(run_id, EventKind::RunCompleted), 1);
    }

    #[tokio::test]
    async fn transient_finish_failure_recovers_on_redelivery() {
        // The terminal commit fails once after the ledger marker is written;
        // the redelivered message must still drive the run to Completed.
        let queue = Arc::new(RecordingQueue::new());
        let store = Arc::new(FlakyStore::failing_finish_runs(1));
        let deferral = Arc::new(DeferralScheduler::new(
            Arc::clone(&queue),
            &CoordinatorConfig::default(),
        ));
        let handler = WorkflowResumeHandler::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::new(StaticEngine(vec![Directive::Complete {
                result: json!({"sent": 1}),
            }])),
            deferral,
            5,
        );
        let run_id = Uuid::now_v7();

        let first = handler.handle(&resume_envelope(run_id, start_cause(), 1)).await;
        assert!(first.is_err());
        assert!(queue.acked().is_empty(), "failed delivery must not be acked");

        let outcome = handler
            .handle(&resume_envelope(run_id, start_cause(), 2))
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Acked);

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.result, Some(json!({"sent": 1})));
        assert_eq!(store.inner.events_of_kind(run_id, EventKind::RunCompleted), 1);
    }

    #[tokio::test]
    async fn missing_terminal_event_is_restored_for_late_resume() {
        let (handler, queue, store) = handler(StaticEngine(vec![]));
        let run_id = Uuid::now_v7();
        // Run committed terminally without its event, as if the process died
        // between the two writes.
        store
            .create_run(&Run::new(run_id, "daily-report", None))
            .await
            .unwrap();
        store.mark_run_running(run_id).await.unwrap();
        store
            .append_event(&RunEvent::run_started(run_id, "daily-report"))
            .await
            .unwrap();
        store
            .finish_run(run_id, RunStatus::Completed, Some(&json!({"sent": 2})), None)
            .await
            .unwrap();

        let cause = ResumeCause::StepCompleted {
            step_id: "fetch#0".to_string(),
        };
        let outcome = handler
            .handle(&resume_envelope(run_id, cause.clone(), 2))
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Acked);
        assert_eq!(queue.acked().len(), 1);
        assert_eq!(store.events_of_kind(run_id, EventKind::RunCompleted), 1);

        // A further duplicate does not append a second event.
        handler
            .handle(&resume_envelope(run_id, cause, 3))
            .await
            .unwrap();
        assert_eq!(store.events_of_kind(run_id, EventKind::RunCompleted), 1);
    }

    #[tokio::test]
    async fn resume_for_unknown_run_is_acked() {
        // A faulting engine proves replay is never entered for foreign runs.
        let (handler, queue, _store) = handler(FaultingEngine);

        let outcome = handler
            .handle(&resume_envelope(
                Uuid::now_v7(),
                ResumeCause::StepCompleted {
                    step_id: "fetch#0".to_string(),
                },
                1,
            ))
            .await
            .unwrap();

        assert_eq!(outcome, HandlerOutcome::Acked);
        assert_eq!(queue.acked().len(), 1);
    }
}
