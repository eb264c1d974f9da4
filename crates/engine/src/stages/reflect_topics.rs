//! Topic-reflection stage: refresh `world.topics` from the exchange.
//!
//! The model's output must be a JSON array of strings, recovered with the
//! tolerant extractor. The stage performs a full replacement of the topic
//! list; a parse failure keeps the prior topics and records an issue.

use cortex_domain::error::Result;
use cortex_domain::message::Message;
use cortex_providers::ResponseFormat;

use crate::extract::extract_string_array;
use crate::state::{TurnState, TurnStatus};
use crate::tool_loop::{run_tool_loop, DeltaMode, ToolLoopRequest};

use super::{token_map, Stage, StageContext, STAGE_REFLECT_TOPICS};

pub struct ReflectTopicsStage;

#[async_trait::async_trait]
impl Stage for ReflectTopicsStage {
    fn id(&self) -> &'static str {
        STAGE_REFLECT_TOPICS
    }

    fn role_key(&self) -> &'static str {
        "reflect"
    }

    async fn run(&self, state: &mut TurnState, cx: &StageContext) -> Result<()> {
        state.runtime.status = TurnStatus::Reflecting;

        let answer = state.final_out.answer.clone().unwrap_or_default();
        let tokens = token_map(&[
            ("USER_TEXT", state.task.user_text.clone()),
            ("ANSWER", answer),
            ("TOPICS", serde_json::to_string(&state.world.topics)?),
        ]);
        let system = cx.prompts.render(STAGE_REFLECT_TOPICS, &tokens)?;

        let (provider, role) = cx.providers.for_role(self.role_key())?;
        let outcome = run_tool_loop(
            provider.as_ref(),
            ToolLoopRequest {
                stage_id: STAGE_REFLECT_TOPICS,
                messages: vec![Message::system(system), Message::user(&state.task.user_text)],
                toolset: cx.registry.toolset_for(&[]),
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

        match extract_string_array(&outcome.text) {
            Some(topics) => {
                state.world.topics = topics;
            }
            None => {
                state.push_issue("topics_parse_failed");
            }
        }
        Ok(())
    }
}
