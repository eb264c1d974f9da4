//! Data transfer objects for the memory store API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// POST /api/memory/query — request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryQueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
}

/// POST /api/memory/query — response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryQueryResponse {
    #[serde(default)]
    pub items: Vec<MemoryItem>,
}

/// One retrieved memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    #[serde(default)]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// POST /api/memory/store — request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStoreRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// POST /api/memory/store — response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStoreResponse {
    #[serde(default)]
    pub id: String,
}
