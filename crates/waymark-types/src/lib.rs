//! Shared domain types for Waymark.
//!
//! This crate contains the durable data model of the engine: execution state,
//! steps, checkpoints, compensation actions, retry policies, saga definitions,
//! engine events, configuration and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod definition;
pub mod error;
pub mod event;
pub mod execution;
pub mod retry;
