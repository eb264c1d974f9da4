//! Memory-retriever stage: turn the context builder's request into
//! concrete memory queries.
//!
//! Runs the tool loop with the memory-read skill only; every successful
//! query appends an EvidencePacket, and control always returns to the
//! context builder.

use cortex_domain::error::Result;
use cortex_domain::message::Message;
use cortex_providers::ResponseFormat;

use crate::state::{NextHop, TurnState, TurnStatus};
use crate::tool_loop::{run_tool_loop, DeltaMode, ToolLoopRequest};
use crate::toolbox::MEMORY_RETRIEVER_SKILLS;

use super::{token_map, Stage, StageContext, STAGE_MEMORY_RETRIEVER};

pub struct MemoryRetrieverStage;

#[async_trait::async_trait]
impl Stage for MemoryRetrieverStage {
    fn id(&self) -> &'static str {
        STAGE_MEMORY_RETRIEVER
    }

    fn role_key(&self) -> &'static str {
        "reflect"
    }

    async fn run(&self, state: &mut TurnState, cx: &StageContext) -> Result<()> {
        state.runtime.status = TurnStatus::ContextLoop;

        let request_json = state
            .context
            .memory_request
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string());

        let tokens = token_map(&[
            ("USER_TEXT", state.task.user_text.clone()),
            ("MEMORY_REQUEST", request_json),
            ("TOPICS", state.world.topics.join(", ")),
        ]);
        let system = cx.prompts.render(STAGE_MEMORY_RETRIEVER, &tokens)?;

        let (provider, role) = cx.providers.for_role(self.role_key())?;
        let outcome = run_tool_loop(
            provider.as_ref(),
            ToolLoopRequest {
                stage_id: STAGE_MEMORY_RETRIEVER,
                messages: vec![Message::system(system), Message::user(&state.task.user_text)],
                toolset: cx.registry.toolset_for(MEMORY_RETRIEVER_SKILLS),
                response_format: ResponseFormat::Null,
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

        state.context.sources.extend(outcome.evidence.iter().cloned());
        super::absorb_outcome(state, &outcome);

        state.context.next = Some(NextHop::ContextBuilder);
        Ok(())
    }
}
