//! The seven stage implementations behind one [`Stage`] trait.
//!
//! Each stage wraps exactly one LLM call (plus the router's mechanical
//! prefill), reads only its declared inputs, and writes only its declared
//! outputs. Tool access goes through the capability firewall: a stage
//! names allowed skills, never tools.

mod answer;
mod context_builder;
mod memory_retriever;
mod reflect_topics;
mod router;
mod world_modifier;
mod memory_writer;

pub use answer::AnswerStage;
pub use context_builder::ContextBuilderStage;
pub use memory_retriever::MemoryRetrieverStage;
pub use memory_writer::MemoryWriterStage;
pub use reflect_topics::ReflectTopicsStage;
pub use router::RouterStage;
pub use world_modifier::WorldModifierStage;

use std::collections::BTreeMap;
use std::sync::Arc;

use cortex_domain::config::Limits;
use cortex_domain::error::Result;

use crate::cancel::CancelToken;
use crate::emitter::Emitter;
use crate::prompt::PromptRenderer;
use crate::registry::{ProviderSet, ToolRegistry, ToolResources};
use crate::state::{EvidencePacket, TurnState};
use crate::tool_loop::LoopOutcome;

// Stage ids (also the prompt template names).
pub const STAGE_ROUTER: &str = "router";
pub const STAGE_CONTEXT_BUILDER: &str = "context_builder";
pub const STAGE_MEMORY_RETRIEVER: &str = "memory_retriever";
pub const STAGE_WORLD_MODIFIER: &str = "world_modifier";
pub const STAGE_ANSWER: &str = "answer";
pub const STAGE_REFLECT_TOPICS: &str = "reflect_topics";
pub const STAGE_MEMORY_WRITER: &str = "memory_writer";

/// Everything a stage needs beside the turn state. One per turn.
pub struct StageContext {
    pub providers: Arc<ProviderSet>,
    pub prompts: Arc<PromptRenderer>,
    pub registry: Arc<ToolRegistry>,
    pub resources: Arc<ToolResources>,
    pub emitter: Emitter,
    pub cancel: CancelToken,
    pub limits: Limits,
}

/// One step in the fixed graph.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> &'static str;
    fn role_key(&self) -> &'static str;
    async fn run(&self, state: &mut TurnState, cx: &StageContext) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn token_map(pairs: &[(&str, String)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Compact textual rendering of the evidence gathered so far, for
/// re-injection into stage prompts.
pub(crate) fn summarize_evidence(sources: &[EvidencePacket]) -> String {
    if sources.is_empty() {
        return "(no evidence collected yet)".to_string();
    }
    let mut out = String::new();
    for packet in sources {
        out.push_str(&format!(
            "### {} via {} ({} items)\n",
            packet.kind,
            packet.meta.tool,
            packet.items.len()
        ));
        for item in packet.items.iter().take(8) {
            out.push_str(&truncate_str(&item.to_string(), 400));
            out.push('\n');
        }
    }
    out
}

/// Fold a tool-loop outcome's bookkeeping into the turn state.
pub(crate) fn absorb_outcome(state: &mut TurnState, outcome: &LoopOutcome) {
    state.record_usage(&outcome.usage, outcome.usage_seen);
    for issue in &outcome.issues {
        state.push_issue(issue.clone());
    }
}

pub(crate) fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
