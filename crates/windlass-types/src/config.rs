//! Coordinator configuration.
//!
//! `CoordinatorConfig` controls retry ceilings, batch sizes, and the queue
//! substrate's deferral capability. All fields have sensible defaults so an
//! empty TOML file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Tunable parameters for the coordinator.
///
/// `max_extension_secs` is the substrate's maximum single visibility
/// extension. It is a configured capability, not a hardcoded constant:
/// sleeps longer than this window are satisfied by repeated re-hops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum delivery attempts for a step before it fails terminally.
    #[serde(default = "default_max_step_attempts")]
    pub max_step_attempts: u32,

    /// Maximum delivery attempts for a resume message whose replay call
    /// faults before the run is forced to failed.
    #[serde(default = "default_max_replay_attempts")]
    pub max_replay_attempts: u32,

    /// Substrate's maximum single visibility extension / enqueue delay.
    #[serde(default = "default_max_extension_secs")]
    pub max_extension_secs: u64,

    /// Visibility window granted on receive before redelivery.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Maximum messages pulled per receive call.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Long-poll wait per receive call.
    #[serde(default = "default_receive_wait_secs")]
    pub receive_wait_secs: u64,

    /// Bound on concurrently executing step messages per batch.
    #[serde(default = "default_step_concurrency")]
    pub step_concurrency: usize,

    /// Base of the exponential retry backoff.
    #[serde(default = "default_retry_backoff_base_secs")]
    pub retry_backoff_base_secs: u64,

    /// Cap on the exponential retry backoff.
    #[serde(default = "default_retry_backoff_cap_secs")]
    pub retry_backoff_cap_secs: u64,
}

fn default_max_step_attempts() -> u32 {
    3
}

fn default_max_replay_attempts() -> u32 {
    5
}

fn default_max_extension_secs() -> u64 {
    900
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> u32 {
    10
}

fn default_receive_wait_secs() -> u64 {
    5
}

fn default_step_concurrency() -> usize {
    8
}

fn default_retry_backoff_base_secs() -> u64 {
    2
}

fn default_retry_backoff_cap_secs() -> u64 {
    300
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_step_attempts: default_max_step_attempts(),
            max_replay_attempts: default_max_replay_attempts(),
            max_extension_secs: default_max_extension_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            batch_size: default_batch_size(),
            receive_wait_secs: default_receive_wait_secs(),
            step_concurrency: default_step_concurrency(),
            retry_backoff_base_secs: default_retry_backoff_base_secs(),
            retry_backoff_cap_secs: default_retry_backoff_cap_secs(),
        }
    }
}
