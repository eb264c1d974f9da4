//! Context-builder stage: plan and gather the evidence the answer needs.
//!
//! Runs the tool loop with the context-read skills, re-rendering its
//! system prompt between rounds so the model sees what it has already
//! gathered. Its structured verdict decides whether the graph visits the
//! memory retriever or proceeds straight to the answer.

use std::sync::Arc;

use serde_json::Value;

use cortex_domain::error::Result;
use cortex_domain::message::Message;
use cortex_providers::ResponseFormat;

use crate::extract::extract_first_json;
use crate::state::{EvidencePacket, NextHop, TurnState, TurnStatus};
use crate::tool_loop::{run_tool_loop, DeltaMode, SystemRefresh, ToolLoopRequest};
use crate::toolbox::CONTEXT_BUILDER_SKILLS;

use super::{summarize_evidence, token_map, Stage, StageContext, STAGE_CONTEXT_BUILDER};

const FORMAT_DIRECTIVE: &str = "Respond with only a JSON object of the shape \
{\"complete\": boolean, \"next\": \"memory_retriever\" | \"answer\", \
\"memory_request\": object | null, \"notes\": [string]}.";

pub struct ContextBuilderStage;

#[async_trait::async_trait]
impl Stage for ContextBuilderStage {
    fn id(&self) -> &'static str {
        STAGE_CONTEXT_BUILDER
    }

    fn role_key(&self) -> &'static str {
        "planner"
    }

    async fn run(&self, state: &mut TurnState, cx: &StageContext) -> Result<()> {
        state.runtime.status = TurnStatus::ContextLoop;

        let base_tokens = token_map(&[
            ("USER_TEXT", state.task.user_text.clone()),
            ("PROJECT", state.world.project.clone()),
            ("TOPICS", state.world.topics.join(", ")),
            ("CONTEXT_SUMMARY", summarize_evidence(&state.context.sources)),
        ]);
        let system = cx.prompts.render(STAGE_CONTEXT_BUILDER, &base_tokens)?;

        // Between rounds, re-render with the packets gathered so far on
        // top of what previous stages already contributed.
        let refresh: SystemRefresh = {
            let prompts = cx.prompts.clone();
            let base = base_tokens.clone();
            let prior = state.context.sources.clone();
            Arc::new(move |new_packets: &[EvidencePacket]| {
                let mut all = prior.clone();
                all.extend_from_slice(new_packets);
                let mut tokens = base.clone();
                tokens.insert("CONTEXT_SUMMARY".into(), summarize_evidence(&all));
                prompts.render(STAGE_CONTEXT_BUILDER, &tokens).ok()
            })
        };

        let (provider, role) = cx.providers.for_role(self.role_key())?;
        let outcome = run_tool_loop(
            provider.as_ref(),
            ToolLoopRequest {
                stage_id: STAGE_CONTEXT_BUILDER,
                messages: vec![Message::system(system), Message::user(&state.task.user_text)],
                toolset: cx.registry.toolset_for(CONTEXT_BUILDER_SKILLS),
                response_format: ResponseFormat::JsonObject,
                format_directive: Some(FORMAT_DIRECTIVE.to_string()),
                delta_mode: DeltaMode::Thinking,
                role,
                rounds_override: Some(cx.limits.context_rounds),
                system_refresh: Some(refresh),
            },
            &cx.resources,
            &cx.emitter,
            &cx.cancel,
            &cx.limits,
        )
        .await?;

        state.context.sources.extend(outcome.evidence.iter().cloned());
        super::absorb_outcome(state, &outcome);

        match extract_first_json(&outcome.text) {
            Some(Value::Object(map)) => {
                state.context.complete = map
                    .get("complete")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                state.context.next = Some(
                    map.get("next")
                        .and_then(Value::as_str)
                        .map(NextHop::parse)
                        .unwrap_or(NextHop::Answer),
                );
                state.context.memory_request =
                    map.get("memory_request").filter(|v| !v.is_null()).cloned();
                if let Some(notes) = map.get("notes").and_then(Value::as_array) {
                    for note in notes.iter().filter_map(Value::as_str) {
                        state.context.issues.push(note.to_string());
                    }
                }
            }
            _ => {
                state.push_issue("context_parse_failed");
                state.context.next = Some(NextHop::Answer);
            }
        }
        Ok(())
    }
}
