//! Per-run resume leases.
//!
//! The replay engine's execution context for a run must never be entered
//! concurrently by two in-flight resumes. Batch-level sequencing handles
//! messages within one batch; this lease map extends the guarantee across
//! batches and worker tasks in the same process, covering substrates that
//! deliver two resume messages for one run concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Map of per-run mutexes handed out as owned guards.
#[derive(Default)]
pub struct RunLeases {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl RunLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lease for a run, waiting if another resume holds it.
    ///
    /// The guard must be held across the entire replay-and-commit section.
    pub async fn acquire(&self, run_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(run_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lease entry for a terminal run. Safe to call while a guard
    /// is outstanding; holders keep their own `Arc`.
    pub fn release(&self, run_id: Uuid) {
        self.locks.remove(&run_id);
    }

    /// Number of runs with a lease entry (for diagnostics).
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
