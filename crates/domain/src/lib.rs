//! Shared domain types for the Cortex cognitive controller.
//!
//! Everything that crosses a crate boundary lives here: the error type,
//! provider streaming events, conversation messages and tool shapes, the
//! `turn.v1` event wire contract, the durable world state, and the
//! construction-time configuration.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod stream;
pub mod world;

pub use error::{Error, Result};
