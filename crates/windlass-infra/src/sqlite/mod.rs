//! SQLite-backed store implementations.

pub mod ledger;
pub mod pool;
pub mod workflow;

pub use pool::DatabasePool;
pub use workflow::SqliteStore;
