//! Answer stage: produce the user-visible reply.
//!
//! Tools are disabled; the single streaming call forwards every text
//! delta as an `assistant_delta` inside the turn's one
//! stream-start/stream-end span. The concatenation of deltas IS the final
//! answer.

use cortex_domain::error::Result;
use cortex_domain::message::Message;
use cortex_providers::ResponseFormat;

use crate::state::{TurnState, TurnStatus};
use crate::tool_loop::{run_tool_loop, DeltaMode, ToolLoopRequest};

use super::{summarize_evidence, token_map, Stage, StageContext, STAGE_ANSWER};

pub struct AnswerStage;

#[async_trait::async_trait]
impl Stage for AnswerStage {
    fn id(&self) -> &'static str {
        STAGE_ANSWER
    }

    fn role_key(&self) -> &'static str {
        "answer"
    }

    async fn run(&self, state: &mut TurnState, cx: &StageContext) -> Result<()> {
        state.runtime.status = TurnStatus::Answering;

        let issues = if state.runtime.issues.is_empty() && state.context.issues.is_empty() {
            "(none)".to_string()
        } else {
            let mut all = state.runtime.issues.clone();
            all.extend(state.context.issues.iter().cloned());
            all.join("; ")
        };

        let tokens = token_map(&[
            ("USER_TEXT", state.task.user_text.clone()),
            ("LANGUAGE", state.task.language.clone()),
            ("NOW_ISO", state.runtime.now_iso.clone()),
            ("PROJECT", state.world.project.clone()),
            ("CONTEXT", summarize_evidence(&state.context.sources)),
            ("ISSUES", issues),
        ]);
        let system = cx.prompts.render(STAGE_ANSWER, &tokens)?;

        let (provider, role) = cx.providers.for_role(self.role_key())?;
        let outcome = run_tool_loop(
            provider.as_ref(),
            ToolLoopRequest {
                stage_id: STAGE_ANSWER,
                messages: vec![Message::system(system), Message::user(&state.task.user_text)],
                toolset: cx.registry.toolset_for(&[]),
                response_format: ResponseFormat::Null,
                format_directive: None,
                delta_mode: DeltaMode::Assistant,
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

        state.set_answer(outcome.text)?;
        Ok(())
    }
}
