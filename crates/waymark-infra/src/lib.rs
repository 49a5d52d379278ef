//! Infrastructure layer for Waymark.
//!
//! Contains the SQLite implementation of the `ExecutionRepository` trait
//! defined in `waymark-core`, plus `config.toml` loading and data directory
//! resolution.

pub mod config;
pub mod filesystem;
pub mod sqlite;
