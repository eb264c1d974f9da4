//! REST implementation of [`MemoryStore`].
//!
//! Wraps a `reqwest::Client` and translates both trait methods into HTTP
//! calls against the configured endpoint, with retry + exponential
//! back-off on transient (5xx / timeout) failures.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use uuid::Uuid;

use cortex_domain::error::{Error, Result};

use crate::provider::MemoryStore;
use crate::types::{
    MemoryQueryRequest, MemoryQueryResponse, MemoryStoreRequest, MemoryStoreResponse,
};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const MAX_RETRIES: u32 = 2;

/// A REST client for the memory store.
///
/// Created once and reused for the lifetime of the controller; the
/// underlying `reqwest::Client` maintains a connection pool. Every request
/// carries the tenant namespace in an `X-User-Namespace` header. The
/// namespace comes from the dedicated config field, never from a
/// credential.
#[derive(Debug, Clone)]
pub struct RestMemoryClient {
    http: Client,
    base_url: String,
    user_namespace: String,
}

impl RestMemoryClient {
    pub fn new(endpoint: &str, user_namespace: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: endpoint.trim_end_matches('/').to_owned(),
            user_namespace: user_namespace.into(),
        })
    }

    // ── request helpers ──────────────────────────────────────────────

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("X-Client-Type", "cortex")
            .header("X-Trace-Id", Uuid::new_v4().to_string())
            .header("X-User-Namespace", &self.user_namespace)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ── retry engine ─────────────────────────────────────────────────

    /// Execute a request with retry + exponential back-off.
    ///
    /// * Retries on 5xx status codes and on timeouts.
    /// * Does **not** retry on 4xx (client errors are permanent).
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let rb = self.decorate(build_request());
            match rb.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let err = Error::Memory(format!(
                        "{endpoint}: HTTP {}",
                        status.as_u16()
                    ));
                    if status.is_server_error() {
                        tracing::warn!(endpoint, status = status.as_u16(), attempt, "memory call failed, retrying");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) if e.is_timeout() => {
                    tracing::warn!(endpoint, attempt, "memory call timed out, retrying");
                    last_err = Some(Error::Timeout(e.to_string()));
                }
                Err(e) => return Err(Error::Http(e.to_string())),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Memory(format!("{endpoint}: retries exhausted"))))
    }
}

#[async_trait::async_trait]
impl MemoryStore for RestMemoryClient {
    async fn query(&self, req: MemoryQueryRequest) -> Result<MemoryQueryResponse> {
        let url = self.url("/api/memory/query");
        let resp = self
            .execute_with_retry("memory.query", || self.http.post(&url).json(&req))
            .await?;
        resp.json::<MemoryQueryResponse>()
            .await
            .map_err(|e| Error::Memory(format!("query response decode: {e}")))
    }

    async fn store(&self, req: MemoryStoreRequest) -> Result<MemoryStoreResponse> {
        let url = self.url("/api/memory/store");
        let resp = self
            .execute_with_retry("memory.store", || self.http.post(&url).json(&req))
            .await?;
        resp.json::<MemoryStoreResponse>()
            .await
            .map_err(|e| Error::Memory(format!("store response decode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let client = RestMemoryClient::new("http://localhost:7700/", "alice").unwrap();
        assert_eq!(
            client.url("/api/memory/query"),
            "http://localhost:7700/api/memory/query"
        );
    }

    #[test]
    fn namespace_is_stored_verbatim() {
        let client = RestMemoryClient::new("http://localhost:7700", "ns-42").unwrap();
        assert_eq!(client.user_namespace, "ns-42");
    }
}
