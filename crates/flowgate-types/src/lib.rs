//! Shared domain types for Flowgate.
//!
//! This crate contains the workflow definition and execution records used
//! across the engine, the engine configuration, notification payloads, and
//! the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
