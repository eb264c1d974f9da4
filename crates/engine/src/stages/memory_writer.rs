//! Memory-writer stage: decide what from this turn is worth keeping.
//!
//! The model issues zero or more `memory_store` calls through the tool
//! loop; the stage itself mutates no turn state.

use cortex_domain::error::Result;
use cortex_domain::message::Message;
use cortex_providers::ResponseFormat;

use crate::state::{TurnState, TurnStatus};
use crate::tool_loop::{run_tool_loop, DeltaMode, ToolLoopRequest};
use crate::toolbox::MEMORY_WRITER_SKILLS;

use super::{summarize_evidence, token_map, Stage, StageContext, STAGE_MEMORY_WRITER};

pub struct MemoryWriterStage;

#[async_trait::async_trait]
impl Stage for MemoryWriterStage {
    fn id(&self) -> &'static str {
        STAGE_MEMORY_WRITER
    }

    fn role_key(&self) -> &'static str {
        "reflect"
    }

    async fn run(&self, state: &mut TurnState, cx: &StageContext) -> Result<()> {
        state.runtime.status = TurnStatus::Writing;

        let answer = state.final_out.answer.clone().unwrap_or_default();
        let tokens = token_map(&[
            ("USER_TEXT", state.task.user_text.clone()),
            ("ANSWER", answer),
            ("EVIDENCE", summarize_evidence(&state.context.sources)),
        ]);
        let system = cx.prompts.render(STAGE_MEMORY_WRITER, &tokens)?;

        let (provider, role) = cx.providers.for_role(self.role_key())?;
        let outcome = run_tool_loop(
            provider.as_ref(),
            ToolLoopRequest {
                stage_id: STAGE_MEMORY_WRITER,
                messages: vec![Message::system(system), Message::user(&state.task.user_text)],
                toolset: cx.registry.toolset_for(MEMORY_WRITER_SKILLS),
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
        super::absorb_outcome(state, &outcome);
        Ok(())
    }
}
