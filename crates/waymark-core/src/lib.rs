//! Execution engine and repository trait definitions for Waymark.
//!
//! This crate defines the persistence "port" (`ExecutionRepository`) that the
//! infrastructure layer implements, plus everything that drives an execution:
//! retry/backoff, checkpointing, compensation, orchestration and recovery. It
//! depends only on `waymark-types` -- never on `waymark-infra` or any database crate.
//!
//! # Deployment precondition
//!
//! The engine takes no locks in the store. Exactly one engine instance may be
//! active per execution-id namespace; two engines sharing one store would both
//! resume the same interrupted executions. Partition the store or elect a
//! leader outside the engine.

pub mod engine;
pub mod event;
pub mod repository;
