use cortex_domain::error::Result;

use crate::types::{
    MemoryQueryRequest, MemoryQueryResponse, MemoryStoreRequest, MemoryStoreResponse,
};

/// Trait the memory tool handlers depend on.
///
/// Implementations are free to parallelise internally; callers only rely
/// on each method being a single logical operation against one tenant
/// namespace.
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Semantic query against the store.
    async fn query(&self, req: MemoryQueryRequest) -> Result<MemoryQueryResponse>;

    /// Persist one memory; returns its id.
    async fn store(&self, req: MemoryStoreRequest) -> Result<MemoryStoreResponse>;
}
