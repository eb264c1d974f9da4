//! Persistence façade: the world-state file and the chat-history log.
//!
//! The controller is the single writer for both files. Readers (the
//! chat-tail tool, external inspectors) get consistent snapshots via
//! full-file reads and line-oriented append discipline.

mod chat;
mod world;

pub use chat::ChatLog;
pub use world::WorldFile;
