//! Queue client port.
//!
//! The coordinator consumes two logical queues through this trait. The
//! substrate must provide at-least-once delivery, per-message attempt
//! counters, and a bounded single visibility extension. Messages not
//! acknowledged within their visibility window are redelivered with an
//! incremented attempt -- that redelivery is the only retry mechanism the
//! coordinator relies on.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use uuid::Uuid;
use windlass_types::error::QueueError;
use windlass_types::message::{MessageEnvelope, MessagePayload, QueueName};

/// Options for a single enqueue call.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Domain-level idempotency key carried on the envelope.
    pub idempotency_key: Option<String>,
    /// Ordering group; the substrate must not deliver two messages of one
    /// group concurrently where ordered groups are supported.
    pub group_key: Option<String>,
    /// Initial delivery delay in seconds (bounded by the substrate's
    /// maximum extension window).
    pub delay_secs: u64,
}

impl EnqueueOptions {
    /// Options for a per-run ordered message.
    pub fn grouped(run_id: Uuid) -> Self {
        Self {
            group_key: Some(run_id.to_string()),
            ..Self::default()
        }
    }

    /// Attach an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Delay initial delivery.
    pub fn with_delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }
}

/// Port for the queue substrate.
pub trait QueueClient: Send + Sync {
    /// Enqueue a message. Failure surfaces as `QueueError::Transport`; it is
    /// never silently dropped.
    fn enqueue(
        &self,
        queue: QueueName,
        payload: MessagePayload,
        opts: EnqueueOptions,
    ) -> impl std::future::Future<Output = Result<Uuid, QueueError>> + Send;

    /// Receive up to `max_messages` from a queue, long-polling up to
    /// `wait_secs`. Every returned message becomes invisible for the
    /// substrate's visibility window and carries an incremented attempt.
    fn receive_batch(
        &self,
        queue: QueueName,
        max_messages: u32,
        wait_secs: u64,
    ) -> impl std::future::Future<Output = Result<Vec<MessageEnvelope>, QueueError>> + Send;

    /// Delete a message, signaling successful terminal processing.
    fn acknowledge(
        &self,
        envelope: &MessageEnvelope,
    ) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;

    /// Defer redelivery without acknowledging. `seconds` must not exceed
    /// [`QueueClient::max_extension_secs`].
    fn extend_invisibility(
        &self,
        envelope: &MessageEnvelope,
        seconds: u64,
    ) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;

    /// The substrate's maximum single visibility extension, in seconds.
    /// Queried, never assumed.
    fn max_extension_secs(&self) -> u64;
}
