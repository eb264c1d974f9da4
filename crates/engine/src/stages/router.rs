//! Router stage: classify the turn and pick the route.
//!
//! Before its (tools-disabled) LLM call the router runs a deterministic
//! prefill: the chat-history tail and one memory query derived
//! mechanically from the world's topics and project. Both results land on
//! `context.sources` so later stages see them.

use serde_json::{json, Value};

use cortex_domain::error::Result;
use cortex_domain::message::{Message, ToolCall};
use cortex_providers::ResponseFormat;

use crate::extract::extract_first_json;
use crate::state::{Route, TurnState, TurnStatus};
use crate::tool_loop::{execute_tool, run_tool_loop, DeltaMode, ToolLoopRequest};
use crate::toolbox::{SKILL_CORE_CONTEXT, SKILL_MEMORY_READ, TOOL_CHAT_TAIL, TOOL_MEMORY_QUERY};

use super::{summarize_evidence, token_map, Stage, StageContext, STAGE_ROUTER};

const PREFILL_CHAT_LIMIT: u64 = 12;
const PREFILL_MEMORY_K: u64 = 5;

pub struct RouterStage;

#[async_trait::async_trait]
impl Stage for RouterStage {
    fn id(&self) -> &'static str {
        STAGE_ROUTER
    }

    fn role_key(&self) -> &'static str {
        "router"
    }

    async fn run(&self, state: &mut TurnState, cx: &StageContext) -> Result<()> {
        let toolset = cx
            .registry
            .toolset_for(&[SKILL_CORE_CONTEXT, SKILL_MEMORY_READ]);

        // ── Mechanical prefill ────────────────────────────────────────
        let mut prefill = vec![ToolCall {
            call_id: "prefill_chat_tail".into(),
            tool_name: TOOL_CHAT_TAIL.into(),
            args_json: json!({ "limit": PREFILL_CHAT_LIMIT }).to_string(),
        }];
        if let Some(query) = topic_digest(state) {
            prefill.push(ToolCall {
                call_id: "prefill_memory_query".into(),
                tool_name: TOOL_MEMORY_QUERY.into(),
                args_json: json!({ "query": query, "k": PREFILL_MEMORY_K }).to_string(),
            });
        }
        for tc in &prefill {
            let exec = execute_tool(
                tc,
                &toolset,
                &cx.resources,
                &cx.emitter,
                STAGE_ROUTER,
                &cx.limits,
            )
            .await;
            if let Some(packet) = exec.evidence {
                state.context.sources.push(packet);
            }
            if !exec.ok {
                cx.emitter
                    .log("warn", STAGE_ROUTER, format!("prefill {} failed", tc.tool_name));
            }
        }

        // ── Routing call (tools disabled) ─────────────────────────────
        let tokens = token_map(&[
            ("USER_TEXT", state.task.user_text.clone()),
            ("NOW_ISO", state.runtime.now_iso.clone()),
            ("TIMEZONE", state.runtime.timezone.clone()),
            ("PROJECT", state.world.project.clone()),
            ("TOPICS", state.world.topics.join(", ")),
            ("EVIDENCE", summarize_evidence(&state.context.sources)),
        ]);
        let system = cx.prompts.render(STAGE_ROUTER, &tokens)?;

        let (provider, role) = cx.providers.for_role(self.role_key())?;
        let outcome = run_tool_loop(
            provider.as_ref(),
            ToolLoopRequest {
                stage_id: STAGE_ROUTER,
                messages: vec![Message::system(system), Message::user(&state.task.user_text)],
                toolset: cx.registry.toolset_for(&[]),
                response_format: ResponseFormat::JsonObject,
                format_directive: None,
                delta_mode: DeltaMode::Thinking,
                role,
                rounds_override: None,
                system_refresh: None,
            },
            &cx.resources,
            &cx.emitter,
            &cx.cancel,
            &cx.limits,
        )
        .await?;
        super::absorb_outcome(state, &outcome);

        match extract_first_json(&outcome.text) {
            Some(Value::Object(map)) => {
                let route = map
                    .get("route")
                    .and_then(Value::as_str)
                    .map(Route::parse)
                    .unwrap_or(Route::Answer);
                state.task.route = route;
                if let Some(lang) = map.get("language").and_then(Value::as_str) {
                    if !lang.is_empty() {
                        state.task.language = lang.to_string();
                    }
                }
            }
            _ => {
                state.push_issue("router_parse_failed");
                state.task.route = Route::Answer;
            }
        }
        state.runtime.status = TurnStatus::Routed;
        Ok(())
    }
}

/// The mechanical memory query for the prefill: project plus topics,
/// space-joined. `None` when the world gives nothing to ask about.
fn topic_digest(state: &TurnState) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    if !state.world.project.is_empty() {
        parts.push(&state.world.project);
    }
    for topic in &state.world.topics {
        parts.push(topic);
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_domain::world::WorldState;

    fn state_with(project: &str, topics: &[&str]) -> TurnState {
        let mut world = WorldState::default();
        world.project = project.into();
        world.topics = topics.iter().map(|s| s.to_string()).collect();
        TurnState::new("hi", world, "2025-01-01T00:00:00Z".into(), "UTC".into())
    }

    #[test]
    fn topic_digest_joins_project_and_topics() {
        let state = state_with("aurora", &["trip", "work"]);
        assert_eq!(topic_digest(&state).unwrap(), "aurora trip work");
    }

    #[test]
    fn topic_digest_empty_world_is_none() {
        let state = state_with("", &[]);
        assert!(topic_digest(&state).is_none());
    }

    #[test]
    fn topic_digest_topics_only() {
        let state = state_with("", &["trip"]);
        assert_eq!(topic_digest(&state).unwrap(), "trip");
    }
}
