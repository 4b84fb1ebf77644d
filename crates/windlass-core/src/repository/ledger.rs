//! Idempotency ledger trait definition.
//!
//! The ledger converts at-least-once delivery into at-most-once application
//! of each logical operation: callers run `create_if_absent` before applying
//! a side effect keyed by an idempotency key. A lost race is reported as
//! data (`created == false`), never as an error, because callers must be
//! able to distinguish "already done" from "failed".

use windlass_types::error::StoreError;

/// Result of a conditional ledger create.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Whether this call created the entry. `false` means the current
    /// delivery is a duplicate of already-applied work.
    pub created: bool,
    /// The durably stored record (the caller's on create, the original
    /// winner's otherwise).
    pub record: serde_json::Value,
}

/// Conditional-create ledger keyed by opaque strings.
pub trait IdempotencyLedger: Send + Sync {
    /// Create the entry for `key` if absent, returning the stored record
    /// either way.
    fn create_if_absent(
        &self,
        key: &str,
        record: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<LedgerEntry, StoreError>> + Send;

    /// Read an entry without creating it.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, StoreError>> + Send;
}

/// Ledger key guarding a run's terminal transition.
pub fn run_terminal_key(run_id: uuid::Uuid) -> String {
    format!("run:{run_id}:terminal")
}
