//! Client for the remote memory/document store.
//!
//! The core only depends on the [`MemoryStore`] trait. `RestMemoryClient`
//! talks to a configured endpoint with retry + back-off; when no endpoint
//! is configured, [`NoopMemoryStore`] makes the memory tools inert
//! (`{items: []}` / `{id: ""}`).

mod noop;
mod provider;
mod rest;
mod types;

pub use noop::NoopMemoryStore;
pub use provider::MemoryStore;
pub use rest::RestMemoryClient;
pub use types::{
    MemoryItem, MemoryQueryRequest, MemoryQueryResponse, MemoryStoreRequest, MemoryStoreResponse,
};
