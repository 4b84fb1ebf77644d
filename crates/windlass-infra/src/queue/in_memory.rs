//! In-process queue with at-least-once delivery semantics.
//!
//! Models the substrate contract the coordinator is written against:
//! visibility windows with redelivery, per-delivery attempt counters, a
//! bounded single extension, enqueue-time idempotency keys, and ordered
//! delivery groups. A claimed (in-flight) message blocks its group until it
//! is acknowledged or its window lapses; a message that is merely delayed
//! does not, so a sleeping run never holds up its other resumes.
//!
//! Timing uses the tokio clock, so tests can drive it with paused time.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;
use windlass_core::queue::{EnqueueOptions, QueueClient};
use windlass_types::config::CoordinatorConfig;
use windlass_types::error::QueueError;
use windlass_types::message::{MessageEnvelope, MessagePayload, QueueName};

struct Slot {
    id: Uuid,
    payload: MessagePayload,
    idempotency_key: Option<String>,
    group_key: Option<String>,
    attempt: u32,
    visible_at: Instant,
    /// Receipt handle of the current delivery; `Some` while in flight.
    receipt: Option<String>,
    enqueued_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct State {
    queues: HashMap<QueueName, Vec<Slot>>,
}

/// In-process [`QueueClient`] backed by per-queue message lists.
pub struct InMemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    visibility_timeout: Duration,
    max_extension_secs: u64,
}

impl InMemoryQueue {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self::with_limits(
            Duration::from_secs(config.visibility_timeout_secs),
            config.max_extension_secs,
        )
    }

    /// Build with explicit visibility and extension limits.
    pub fn with_limits(visibility_timeout: Duration, max_extension_secs: u64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            visibility_timeout,
            max_extension_secs,
        }
    }

    /// Messages currently held for a queue, in flight or not.
    pub fn depth(&self, queue: QueueName) -> usize {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.queues.get(&queue).map_or(0, Vec::len)
    }

    /// Claim up to `max` deliverable messages. Returns the batch plus the
    /// earliest future visibility instant, for the long-poll sleep.
    fn try_claim(&self, queue: QueueName, max: u32) -> (Vec<MessageEnvelope>, Option<Instant>) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let slots = state.queues.entry(queue).or_default();

        // Lapse expired deliveries so they become claimable again.
        for slot in slots.iter_mut() {
            if slot.receipt.is_some() && slot.visible_at <= now {
                tracing::debug!(message_id = %slot.id, "visibility window lapsed");
                slot.receipt = None;
            }
        }

        let mut blocked: HashSet<String> = slots
            .iter()
            .filter(|s| s.receipt.is_some())
            .filter_map(|s| s.group_key.clone())
            .collect();

        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for slot in slots.iter_mut() {
            if batch.len() as u32 >= max {
                break;
            }
            if slot.receipt.is_some() {
                continue;
            }
            if slot.visible_at > now {
                next_visible = Some(next_visible.map_or(slot.visible_at, |t| t.min(slot.visible_at)));
                continue;
            }
            if let Some(group) = &slot.group_key {
                if blocked.contains(group) {
                    continue;
                }
                // One in-flight message per group; the rest wait.
                blocked.insert(group.clone());
            }

            slot.attempt += 1;
            slot.visible_at = now + self.visibility_timeout;
            let receipt = Uuid::now_v7().to_string();
            slot.receipt = Some(receipt.clone());
            batch.push(MessageEnvelope {
                id: slot.id,
                queue,
                message_id: receipt,
                attempt: slot.attempt,
                idempotency_key: slot.idempotency_key.clone(),
                payload: slot.payload.clone(),
                enqueued_at: slot.enqueued_at,
            });
        }

        (batch, next_visible)
    }
}

impl QueueClient for InMemoryQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        payload: MessagePayload,
        opts: EnqueueOptions,
    ) -> Result<Uuid, QueueError> {
        let id = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let slots = state.queues.entry(queue).or_default();

            // Enqueue-time dedupe: a key already held (pending or in
            // flight) absorbs the duplicate. Acknowledged messages are
            // forgotten; the durable ledger covers everything after that.
            if let Some(key) = &opts.idempotency_key {
                if let Some(existing) = slots
                    .iter()
                    .find(|s| s.idempotency_key.as_deref() == Some(key.as_str()))
                {
                    tracing::debug!(%queue, key, "enqueue absorbed by idempotency key");
                    return Ok(existing.id);
                }
            }

            let id = Uuid::now_v7();
            slots.push(Slot {
                id,
                payload,
                idempotency_key: opts.idempotency_key,
                group_key: opts.group_key,
                attempt: 0,
                visible_at: Instant::now() + Duration::from_secs(opts.delay_secs),
                receipt: None,
                enqueued_at: Utc::now(),
            });
            id
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn receive_batch(
        &self,
        queue: QueueName,
        max_messages: u32,
        wait_secs: u64,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        let deadline = Instant::now() + Duration::from_secs(wait_secs);
        loop {
            let (batch, next_visible) = self.try_claim(queue, max_messages);
            if !batch.is_empty() {
                return Ok(batch);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(&self, envelope: &MessageEnvelope) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let slots = state.queues.entry(envelope.queue).or_default();
            let index = slots
                .iter()
                .position(|s| s.id == envelope.id && s.receipt.as_deref() == Some(envelope.message_id.as_str()))
                .ok_or_else(|| QueueError::UnknownReceipt(envelope.message_id.clone()))?;
            slots.remove(index);
        }
        // An ack can unblock the message's delivery group.
        self.notify.notify_waiters();
        Ok(())
    }

    async fn extend_invisibility(
        &self,
        envelope: &MessageEnvelope,
        seconds: u64,
    ) -> Result<(), QueueError> {
        if seconds > self.max_extension_secs {
            return Err(QueueError::Transport(format!(
                "extension of {seconds}s exceeds the {}s window",
                self.max_extension_secs
            )));
        }
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let slots = state.queues.entry(envelope.queue).or_default();
        let slot = slots
            .iter_mut()
            .find(|s| s.id == envelope.id && s.receipt.as_deref() == Some(envelope.message_id.as_str()))
            .ok_or_else(|| QueueError::UnknownReceipt(envelope.message_id.clone()))?;
        slot.visible_at = Instant::now() + Duration::from_secs(seconds);
        Ok(())
    }

    fn max_extension_secs(&self) -> u64 {
        self.max_extension_secs
    }
}
