//! The `turn.v1` event wire contract.
//!
//! Every event a turn emits is an envelope
//! `{protocol, seq, turn_id, type, ts, payload}` with a monotonic,
//! contiguous `seq` starting at 1. Consumers (UI, logger, tests) subscribe
//! to the per-turn stream and must tolerate non-essential events being
//! dropped under backpressure (signalled by a single `overflow` event).

use serde::{Deserialize, Serialize};

use crate::stream::Usage;
use crate::world::WorldDiff;

/// Wire protocol identifier stamped on every event.
pub const PROTOCOL: &str = "turn.v1";

fn d_protocol() -> String {
    PROTOCOL.to_string()
}

/// One event on a turn's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    #[serde(default = "d_protocol")]
    pub protocol: String,
    pub seq: u64,
    pub turn_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Terminal failure classes for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Cancelled,
    Deadline,
    Transport,
    Internal,
}

/// Error classes a tool invocation can produce. These are injected back
/// into the model context as `{ok:false, error:{kind, message}}` tool
/// messages and mirrored on `tool_result` events; they are never fatal to
/// the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    BadArgs,
    Forbidden,
    Timeout,
    Handler,
    InvalidResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// Summary attached to `turn_end_ok`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSummary {
    pub nodes_visited: Vec<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Typed payloads, tagged by the wire `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    TurnStart {
        user_text: String,
        now_iso: String,
        timezone: String,
    },
    TurnEndOk {
        summary: TurnSummary,
    },
    TurnEndError {
        reason: EndReason,
        message: String,
    },
    NodeStart {
        stage_id: String,
        role_key: String,
    },
    NodeEnd {
        stage_id: String,
        ok: bool,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        issues: Vec<String>,
    },
    AssistantStreamStart {},
    AssistantDelta {
        text: String,
    },
    AssistantStreamEnd {
        text_total: String,
    },
    DeltaThinking {
        text: String,
    },
    Log {
        level: String,
        source: String,
        message: String,
    },
    ToolCall {
        stage_id: String,
        name: String,
        id: String,
        args_digest: String,
    },
    ToolResult {
        stage_id: String,
        name: String,
        id: String,
        ok: bool,
        duration_ms: u64,
        bytes: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ToolError>,
    },
    WorldCommit {
        diff: WorldDiff,
    },
    Overflow {
        dropped: u64,
    },
}

impl EventPayload {
    /// Non-essential events may be dropped (oldest first) when a
    /// subscriber's buffer overflows. Lifecycle, tool-trace, commit, and
    /// overflow events are never dropped.
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            EventPayload::DeltaThinking { .. }
                | EventPayload::AssistantDelta { .. }
                | EventPayload::Log { .. }
        )
    }

    /// The wire `type` tag, for logging and assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::TurnStart { .. } => "turn_start",
            EventPayload::TurnEndOk { .. } => "turn_end_ok",
            EventPayload::TurnEndError { .. } => "turn_end_error",
            EventPayload::NodeStart { .. } => "node_start",
            EventPayload::NodeEnd { .. } => "node_end",
            EventPayload::AssistantStreamStart {} => "assistant_stream_start",
            EventPayload::AssistantDelta { .. } => "assistant_delta",
            EventPayload::AssistantStreamEnd { .. } => "assistant_stream_end",
            EventPayload::DeltaThinking { .. } => "delta_thinking",
            EventPayload::Log { .. } => "log",
            EventPayload::ToolCall { .. } => "tool_call",
            EventPayload::ToolResult { .. } => "tool_result",
            EventPayload::WorldCommit { .. } => "world_commit",
            EventPayload::Overflow { .. } => "overflow",
        }
    }
}
