//! Engine event stream.
//!
//! The `EventBus` fans `EngineEvent`s out to any number of subscribers over a
//! `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
