//! The per-turn state record threaded through every stage.
//!
//! The executor exclusively owns a `TurnState` for the duration of one
//! turn. Stages receive it mutably, write only their declared outputs, and
//! return. The emitter is deliberately NOT part of this record: it is a
//! capability passed alongside, so the state stays serialisable.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use cortex_domain::error::{Error, Result};
use cortex_domain::stream::Usage;
use cortex_domain::world::WorldState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Route and status machines
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Router verdict. Unknown values collapse to the default route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Answer,
    Context,
    World,
}

impl Route {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "context" => Route::Context,
            "world" => Route::World,
            _ => Route::Answer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Answer => "answer",
            Route::Context => "context",
            Route::World => "world",
        }
    }
}

/// Where the context loop goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextHop {
    Answer,
    MemoryRetriever,
    ContextBuilder,
}

impl NextHop {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "memory_retriever" => NextHop::MemoryRetriever,
            "context_builder" => NextHop::ContextBuilder,
            _ => NextHop::Answer,
        }
    }
}

/// Per-turn lifecycle, appended to `runtime.node_trace` as it advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Created,
    Routed,
    ContextLoop,
    WorldEdit,
    Answering,
    Reflecting,
    Writing,
    EndedOk,
    EndedErr,
    EndedCancelled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct TaskState {
    /// Immutable after turn creation.
    pub user_text: String,
    pub language: String,
    pub route: Route,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceMeta {
    pub tool: String,
    pub ts: String,
    pub args_digest: String,
}

/// Canonical container for tool-retrieved items on `context.sources`.
#[derive(Debug, Clone, Serialize)]
pub struct EvidencePacket {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub items: Vec<Value>,
    pub meta: EvidenceMeta,
}

/// The one canonical context shape. There is no nested alias; stages only
/// ever see this struct.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextState {
    /// Append-only within a turn; never reordered or rewritten.
    pub sources: Vec<EvidencePacket>,
    pub complete: bool,
    pub issues: Vec<String>,
    pub next: Option<NextHop>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FinalState {
    /// Written exactly once, by the answer stage.
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeState {
    pub turn_id: String,
    pub now_iso: String,
    pub timezone: String,
    pub status: TurnStatus,
    pub issues: Vec<String>,
    /// Strictly append-only: `"<stage_id>:entered"` / `"<stage_id>:committed"`.
    pub node_trace: Vec<String>,
    /// Provider usage accumulated across all stage calls.
    pub usage: Usage,
    /// True once any provider reported usage.
    pub usage_seen: bool,
}

/// The shared mutable record passed by reference through all stages.
#[derive(Debug, Clone, Serialize)]
pub struct TurnState {
    pub task: TaskState,
    pub context: ContextState,
    pub final_out: FinalState,
    /// Snapshot of the durable world loaded at turn start; mutated only by
    /// world-tool results (plus the declared `topics` output of
    /// reflection); committed once at turn end.
    pub world: WorldState,
    pub runtime: RuntimeState,
}

impl TurnState {
    pub fn new(user_text: impl Into<String>, world: WorldState, now_iso: String, timezone: String) -> Self {
        Self {
            task: TaskState {
                user_text: user_text.into(),
                language: "en".into(),
                route: Route::Answer,
            },
            context: ContextState::default(),
            final_out: FinalState::default(),
            world,
            runtime: RuntimeState {
                turn_id: Uuid::new_v4().to_string(),
                now_iso,
                timezone,
                status: TurnStatus::Created,
                issues: Vec::new(),
                node_trace: Vec::new(),
                usage: Usage::default(),
                usage_seen: false,
            },
        }
    }

    /// Record `<stage>:entered` in the node trace.
    pub fn trace_entered(&mut self, stage_id: &str) {
        self.runtime.node_trace.push(format!("{stage_id}:entered"));
    }

    /// Record `<stage>:committed` in the node trace.
    pub fn trace_committed(&mut self, stage_id: &str) {
        self.runtime.node_trace.push(format!("{stage_id}:committed"));
    }

    pub fn push_issue(&mut self, issue: impl Into<String>) {
        self.runtime.issues.push(issue.into());
    }

    /// Write the final answer. Exactly one write is permitted per turn.
    pub fn set_answer(&mut self, text: impl Into<String>) -> Result<()> {
        if self.final_out.answer.is_some() {
            return Err(Error::Other("final answer already written".into()));
        }
        self.final_out.answer = Some(text.into());
        Ok(())
    }

    pub fn record_usage(&mut self, usage: &Usage, seen: bool) {
        self.runtime.usage.add(usage);
        if seen {
            self.runtime.usage_seen = true;
        }
    }
}

/// Helper for stamping the current wall clock in the turn's timezone.
pub fn now_in_timezone(tz_name: &str) -> (String, String) {
    match tz_name.parse::<chrono_tz::Tz>() {
        Ok(tz) => (Utc::now().with_timezone(&tz).to_rfc3339(), tz_name.to_string()),
        Err(_) => {
            tracing::warn!(timezone = tz_name, "unknown timezone, falling back to UTC");
            (Utc::now().to_rfc3339(), "UTC".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TurnState {
        TurnState::new(
            "hello",
            WorldState::default(),
            "2025-01-01T00:00:00Z".into(),
            "UTC".into(),
        )
    }

    #[test]
    fn route_parse_unknown_defaults_to_answer() {
        assert_eq!(Route::parse("context"), Route::Context);
        assert_eq!(Route::parse("WORLD"), Route::World);
        assert_eq!(Route::parse("chit-chat"), Route::Answer);
        assert_eq!(Route::parse(""), Route::Answer);
    }

    #[test]
    fn next_hop_parse() {
        assert_eq!(NextHop::parse("memory_retriever"), NextHop::MemoryRetriever);
        assert_eq!(NextHop::parse("answer"), NextHop::Answer);
        assert_eq!(NextHop::parse("nonsense"), NextHop::Answer);
    }

    #[test]
    fn answer_written_exactly_once() {
        let mut s = state();
        s.set_answer("Hi.").unwrap();
        assert!(s.set_answer("again").is_err());
        assert_eq!(s.final_out.answer.as_deref(), Some("Hi."));
    }

    #[test]
    fn node_trace_appends_in_order() {
        let mut s = state();
        s.trace_entered("router");
        s.trace_committed("router");
        s.trace_entered("answer");
        assert_eq!(
            s.runtime.node_trace,
            vec!["router:entered", "router:committed", "answer:entered"]
        );
    }

    #[test]
    fn usage_accumulates_across_stages() {
        let mut s = state();
        s.record_usage(
            &Usage {
                prompt_tokens: 5,
                completion_tokens: 3,
                total_tokens: 8,
            },
            true,
        );
        s.record_usage(&Usage::default(), false);
        assert_eq!(s.runtime.usage.total_tokens, 8);
        assert!(s.runtime.usage_seen);
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let (_, tz) = now_in_timezone("Mars/Olympus_Mons");
        assert_eq!(tz, "UTC");
    }

    #[test]
    fn known_timezone_is_kept() {
        let (_, tz) = now_in_timezone("Europe/Amsterdam");
        assert_eq!(tz, "Europe/Amsterdam");
    }
}
