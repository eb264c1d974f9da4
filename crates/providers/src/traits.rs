use cortex_domain::error::Result;
use cortex_domain::message::{Message, ToolDefinition};
use cortex_domain::stream::{BoxStream, StreamEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Response-format hint for a chat request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseFormat {
    /// No formatting constraint.
    #[default]
    Null,
    /// The model must respond with a single JSON object.
    JsonObject,
    /// The model must respond matching a named JSON schema.
    JsonSchema {
        name: String,
        schema: serde_json::Value,
    },
}

impl ResponseFormat {
    pub fn is_null(&self) -> bool {
        matches!(self, ResponseFormat::Null)
    }
}

/// A provider-agnostic streaming chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke. Empty = tools disabled.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the server choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the server choose.
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    pub stop: Vec<String>,
    /// Formatting constraint for the response.
    pub response_format: ResponseFormat,
    /// Model identifier. When `None`, the adapter uses its default.
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter must implement.
///
/// The returned stream is ordered: zero or more text/thinking deltas and
/// tool-call events, ended by exactly one `Finished`. Transport failures
/// surface as typed errors; the tool loop owns retry policy.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a chat request and return a stream of events.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
