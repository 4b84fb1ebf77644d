//! Coordinator logic and port trait definitions for Windlass.
//!
//! This crate defines the "ports" (queue client, durable store, replay
//! engine, step executor) that the infrastructure layer implements, plus the
//! coordinator itself: the handlers, dispatcher, and deferral machinery that
//! turn at-least-once queue delivery into at-most-once workflow side
//! effects. It depends only on `windlass-types` -- never on a database or
//! transport crate.

pub mod coordinator;
pub mod queue;
pub mod replay;
pub mod repository;
