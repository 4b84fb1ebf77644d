//! Shared domain types for Windlass.
//!
//! This crate contains the core domain types used across the Windlass
//! coordinator: Run, Step, RunEvent, the queue message envelope, and their
//! associated error and configuration types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod run;
pub mod step;
