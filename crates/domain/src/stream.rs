use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::message::ToolCall;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

/// Events emitted during LLM streaming (provider-agnostic).
///
/// The ordered stream may interleave text deltas, thinking deltas, and tool
/// calls; it ends with exactly one `Finished`. Tool calls arrive in three
/// phases (started / args delta / completed) because most wire formats stream
/// the argument JSON incrementally.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A chunk of answer text.
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    /// A chunk of reasoning/thinking text (models that expose it).
    #[serde(rename = "thinking")]
    Thinking { text: String },

    /// A tool call has started.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool call argument data.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full arguments.
    #[serde(rename = "tool_call_completed")]
    ToolCallCompleted { call: ToolCall },

    /// Stream is finished.
    #[serde(rename = "finished")]
    Finished {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

/// Token usage for a completion. Providers may omit it; absence is logged
/// by the consumer, never an error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}
