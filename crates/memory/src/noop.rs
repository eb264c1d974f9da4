use cortex_domain::error::Result;

use crate::provider::MemoryStore;
use crate::types::{
    MemoryQueryRequest, MemoryQueryResponse, MemoryStoreRequest, MemoryStoreResponse,
};

/// Stand-in used when no memory endpoint is configured.
///
/// Queries return an empty item list and stores return an empty id, so
/// stages keep working without a store attached.
#[derive(Debug, Default, Clone)]
pub struct NoopMemoryStore;

#[async_trait::async_trait]
impl MemoryStore for NoopMemoryStore {
    async fn query(&self, _req: MemoryQueryRequest) -> Result<MemoryQueryResponse> {
        Ok(MemoryQueryResponse { items: Vec::new() })
    }

    async fn store(&self, _req: MemoryStoreRequest) -> Result<MemoryStoreResponse> {
        Ok(MemoryStoreResponse { id: String::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_returns_empty_items() {
        let store = NoopMemoryStore;
        let resp = store
            .query(MemoryQueryRequest {
                query: "anything".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(resp.items.is_empty());
    }

    #[tokio::test]
    async fn store_returns_empty_id() {
        let store = NoopMemoryStore;
        let resp = store
            .store(MemoryStoreRequest {
                text: "a note".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.id, "");
    }
}
