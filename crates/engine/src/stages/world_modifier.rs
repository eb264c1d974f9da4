//! World-modifier stage: apply the user's world-edit intent.
//!
//! The model can only change the world through `world_apply_ops`, which
//! mutates the turn's working copy. After the loop the stage copies the
//! working copy back into the turn state; the durable file is untouched
//! until the executor commits at turn end.

use cortex_domain::error::Result;
use cortex_domain::message::Message;
use cortex_providers::ResponseFormat;

use crate::state::{TurnState, TurnStatus};
use crate::tool_loop::{run_tool_loop, DeltaMode, ToolLoopRequest};
use crate::toolbox::WORLD_MODIFIER_SKILLS;

use super::{token_map, Stage, StageContext, STAGE_WORLD_MODIFIER};

pub struct WorldModifierStage;

#[async_trait::async_trait]
impl Stage for WorldModifierStage {
    fn id(&self) -> &'static str {
        STAGE_WORLD_MODIFIER
    }

    fn role_key(&self) -> &'static str {
        "planner"
    }

    async fn run(&self, state: &mut TurnState, cx: &StageContext) -> Result<()> {
        state.runtime.status = TurnStatus::WorldEdit;

        // The working copy starts from this turn's world snapshot.
        *cx.resources.world.lock() = state.world.clone();

        let world_json = serde_json::to_string_pretty(&state.world)?;
        let tokens = token_map(&[
            ("USER_TEXT", state.task.user_text.clone()),
            ("WORLD", world_json),
        ]);
        let system = cx.prompts.render(STAGE_WORLD_MODIFIER, &tokens)?;

        let (provider, role) = cx.providers.for_role(self.role_key())?;
        let outcome = run_tool_loop(
            provider.as_ref(),
            ToolLoopRequest {
                stage_id: STAGE_WORLD_MODIFIER,
                messages: vec![Message::system(system), Message::user(&state.task.user_text)],
                toolset: cx.registry.toolset_for(WORLD_MODIFIER_SKILLS),
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

        // Commit the tool results into the turn state.
        state.world = cx.resources.world.lock().clone();
        Ok(())
    }
}
