//! Observability setup for Windlass binaries and tests.

pub mod tracing_setup;

pub use tracing_setup::init_tracing;
