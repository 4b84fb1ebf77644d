//! Delay and deferral scheduling.
//!
//! Maps requested sleep durations onto queue redelivery timing. The
//! substrate allows only a bounded single extension, so durations beyond
//! that window are satisfied by re-hops: the wake message carries the
//! absolute `wake_at`, and each early delivery is re-deferred by the
//! remaining time (clamped) until the cumulative elapsed time is satisfied.
//! Callers never see the substrate's window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;
use windlass_types::config::CoordinatorConfig;
use windlass_types::error::QueueError;
use windlass_types::message::{MessageEnvelope, MessagePayload, QueueName, ResumeCause};

use crate::queue::{EnqueueOptions, QueueClient};

/// Schedules wakes and retry backoffs against the queue substrate.
pub struct DeferralScheduler<Q> {
    queue: Arc<Q>,
    max_extension_secs: u64,
    backoff_base_secs: u64,
    backoff_cap_secs: u64,
}

impl<Q: QueueClient> DeferralScheduler<Q> {
    /// Build a scheduler. The effective extension ceiling is the smaller of
    /// the configured value and what the substrate reports.
    pub fn new(queue: Arc<Q>, config: &CoordinatorConfig) -> Self {
        let max_extension_secs = config.max_extension_secs.min(queue.max_extension_secs());
        Self {
            queue,
            max_extension_secs,
            backoff_base_secs: config.retry_backoff_base_secs,
            backoff_cap_secs: config.retry_backoff_cap_secs,
        }
    }

    /// The effective single-extension ceiling in seconds.
    pub fn max_extension_secs(&self) -> u64 {
        self.max_extension_secs
    }

    /// Clamp a requested deferral to the single-extension window.
    pub fn clamp_secs(&self, secs: u64) -> u64 {
        secs.min(self.max_extension_secs)
    }

    /// Defer redelivery of a received message by up to `total_secs`.
    ///
    /// Returns the seconds actually applied; when the request exceeded the
    /// window the message comes back early and the caller re-defers by the
    /// remainder.
    pub async fn defer(
        &self,
        envelope: &MessageEnvelope,
        total_secs: u64,
    ) -> Result<u64, QueueError> {
        let applied = self.clamp_secs(total_secs.max(1));
        self.queue.extend_invisibility(envelope, applied).await?;
        tracing::debug!(
            message_id = %envelope.id,
            requested = total_secs,
            applied,
            "deferred redelivery"
        );
        Ok(applied)
    }

    /// Enqueue a wake message for a sleeping run.
    ///
    /// The payload carries the absolute wake instant so re-hops can compute
    /// the remaining time; the first hop is the clamped delay.
    pub async fn schedule_wake(&self, run_id: Uuid, total: Duration) -> Result<Uuid, QueueError> {
        let total_secs = total.as_secs();
        let wake_at = Utc::now() + chrono::Duration::seconds(total_secs as i64);
        let delay = self.clamp_secs(total_secs);

        let message_id = self
            .queue
            .enqueue(
                QueueName::WorkflowResume,
                MessagePayload::WorkflowResume {
                    run_id,
                    cause: ResumeCause::Wake { wake_at },
                },
                EnqueueOptions::grouped(run_id).with_delay_secs(delay),
            )
            .await?;

        tracing::debug!(
            %run_id,
            total_secs,
            first_hop_secs = delay,
            "scheduled wake"
        );
        Ok(message_id)
    }

    /// Exponential retry backoff for the given delivery attempt (1-based),
    /// capped by configuration and the extension window.
    pub fn retry_backoff_secs(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .backoff_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_secs);
        self.clamp_secs(backoff.max(1))
    }
}
