//! The graph executor: drive the fixed conditional topology and stream
//! the turn's events.
//!
//! Topology:
//! `router` → (`context_builder` ⇄ `memory_retriever` | `world_modifier`)
//! → `answer` → `reflect_topics` → `memory_writer` → END.
//! The context loop is bounded; a stage error before the answer degrades
//! to the answer stage instead of killing the turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_domain::config::Limits;
use cortex_domain::error::Error;
use cortex_domain::event::{EndReason, EventPayload, TurnSummary};
use cortex_domain::world::{ChatRole, ChatTurn, WorldDiff, WorldState};
use cortex_store::{ChatLog, WorldFile};

use crate::stages::{
    AnswerStage, ContextBuilderStage, MemoryRetrieverStage, MemoryWriterStage, ReflectTopicsStage,
    RouterStage, Stage, StageContext, WorldModifierStage, STAGE_ANSWER, STAGE_CONTEXT_BUILDER,
    STAGE_MEMORY_RETRIEVER, STAGE_MEMORY_WRITER, STAGE_REFLECT_TOPICS, STAGE_ROUTER,
    STAGE_WORLD_MODIFIER,
};
use crate::state::{NextHop, Route, TurnState, TurnStatus};

pub struct GraphExecutor {
    stages: HashMap<&'static str, Arc<dyn Stage>>,
    world_file: Arc<WorldFile>,
    chat: Arc<ChatLog>,
    limits: Limits,
}

impl GraphExecutor {
    pub fn new(world_file: Arc<WorldFile>, chat: Arc<ChatLog>, limits: Limits) -> Self {
        let mut stages: HashMap<&'static str, Arc<dyn Stage>> = HashMap::new();
        for stage in [
            Arc::new(RouterStage) as Arc<dyn Stage>,
            Arc::new(ContextBuilderStage),
            Arc::new(MemoryRetrieverStage),
            Arc::new(WorldModifierStage),
            Arc::new(AnswerStage),
            Arc::new(ReflectTopicsStage),
            Arc::new(MemoryWriterStage),
        ] {
            stages.insert(stage.id(), stage);
        }
        Self {
            stages,
            world_file,
            chat,
            limits,
        }
    }

    /// Run one complete turn. Emits `turn_start` first and exactly one
    /// `turn_end_*` last; `world_commit` (if the world changed) comes
    /// immediately before the end event.
    pub async fn run_turn(&self, mut state: TurnState, cx: &StageContext) -> TurnState {
        let turn_started = Instant::now();
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.limits.turn_deadline_ms);
        let pre_world = state.world.clone();

        cx.emitter.emit(EventPayload::TurnStart {
            user_text: state.task.user_text.clone(),
            now_iso: state.runtime.now_iso.clone(),
            timezone: state.runtime.timezone.clone(),
        });

        let mut current = Some(STAGE_ROUTER);
        let mut context_trips: u32 = 0;
        let mut nodes_visited: Vec<String> = Vec::new();
        let mut failure: Option<(EndReason, String)> = None;

        while let Some(stage_id) = current.take() {
            if cx.cancel.is_cancelled() {
                failure = Some((EndReason::Cancelled, "turn cancelled".into()));
                break;
            }
            let stage = self.stages[stage_id].clone();
            nodes_visited.push(stage_id.to_string());

            cx.emitter.emit(EventPayload::NodeStart {
                stage_id: stage_id.to_string(),
                role_key: stage.role_key().to_string(),
            });
            state.trace_entered(stage_id);

            let issues_before = state.runtime.issues.len();
            let stage_started = Instant::now();
            let result = tokio::time::timeout_at(deadline, stage.run(&mut state, cx)).await;
            let duration_ms = stage_started.elapsed().as_millis() as u64;

            match result {
                Err(_elapsed) => {
                    state.push_issue(format!("{stage_id}: turn deadline exceeded"));
                    self.emit_node_end(cx, stage_id, false, duration_ms, &state, issues_before);
                    failure = Some((EndReason::Deadline, "turn deadline exceeded".into()));
                    break;
                }
                Ok(Err(Error::Cancelled)) => {
                    self.emit_node_end(cx, stage_id, false, duration_ms, &state, issues_before);
                    failure = Some((EndReason::Cancelled, "turn cancelled".into()));
                    break;
                }
                Ok(Err(e)) => {
                    state.push_issue(format!("{stage_id}: {e}"));
                    self.emit_node_end(cx, stage_id, false, duration_ms, &state, issues_before);
                    cx.emitter.log("warn", stage_id, e.to_string());

                    // Pre-answer failures degrade: the answer stage still
                    // runs with whatever context and issues exist.
                    if state.final_out.answer.is_none() && stage_id != STAGE_ANSWER {
                        current = Some(STAGE_ANSWER);
                        continue;
                    }
                    // After the answer only transport exhaustion is
                    // terminal; other post-answer stage errors skip ahead.
                    if stage_id != STAGE_ANSWER
                        && classify_error(&e) != EndReason::Transport
                    {
                        current = self.next_stage(stage_id, &mut state, &mut context_trips, cx);
                        continue;
                    }
                    failure = Some((classify_error(&e), e.to_string()));
                    break;
                }
                Ok(Ok(())) => {
                    state.trace_committed(stage_id);
                    self.emit_node_end(cx, stage_id, true, duration_ms, &state, issues_before);
                    current = self.next_stage(stage_id, &mut state, &mut context_trips, cx);
                }
            }
        }

        if let Some((reason, message)) = failure {
            state.runtime.status = match reason {
                EndReason::Cancelled => TurnStatus::EndedCancelled,
                _ => TurnStatus::EndedErr,
            };
            cx.emitter
                .emit(EventPayload::TurnEndError { reason, message });
            return state;
        }

        // ── World commit ─────────────────────────────────────────────
        if let Err(message) = self.commit_world(&pre_world, &mut state, cx) {
            state.runtime.status = TurnStatus::EndedErr;
            cx.emitter.emit(EventPayload::TurnEndError {
                reason: EndReason::Internal,
                message,
            });
            return state;
        }

        // ── Assistant history append ─────────────────────────────────
        if let Some(answer) = &state.final_out.answer {
            if let Err(e) = self.chat.append(&ChatTurn::now(ChatRole::Assistant, answer)) {
                tracing::warn!(error = %e, "failed to append assistant turn to chat history");
                cx.emitter.log("warn", "controller", format!("history append failed: {e}"));
            }
        }

        state.runtime.status = TurnStatus::EndedOk;
        if !state.runtime.usage_seen {
            tracing::debug!("provider reported no token usage this turn");
        }
        cx.emitter.emit(EventPayload::TurnEndOk {
            summary: TurnSummary {
                nodes_visited,
                duration_ms: turn_started.elapsed().as_millis() as u64,
                usage: state.runtime.usage_seen.then_some(state.runtime.usage),
            },
        });
        state
    }

    fn emit_node_end(
        &self,
        cx: &StageContext,
        stage_id: &str,
        ok: bool,
        duration_ms: u64,
        state: &TurnState,
        issues_before: usize,
    ) {
        cx.emitter.emit(EventPayload::NodeEnd {
            stage_id: stage_id.to_string(),
            ok,
            duration_ms,
            issues: state.runtime.issues[issues_before..].to_vec(),
        });
    }

    /// Pick the next stage from the declared routes.
    fn next_stage(
        &self,
        stage_id: &str,
        state: &mut TurnState,
        context_trips: &mut u32,
        cx: &StageContext,
    ) -> Option<&'static str> {
        match stage_id {
            STAGE_ROUTER => Some(match state.task.route {
                Route::Context => STAGE_CONTEXT_BUILDER,
                Route::World => STAGE_WORLD_MODIFIER,
                Route::Answer => STAGE_ANSWER,
            }),
            STAGE_CONTEXT_BUILDER => {
                if state.context.next == Some(NextHop::MemoryRetriever) {
                    if *context_trips < self.limits.context_rounds {
                        *context_trips += 1;
                        Some(STAGE_MEMORY_RETRIEVER)
                    } else {
                        state.push_issue("context_loop_bounded");
                        cx.emitter
                            .log("warn", STAGE_CONTEXT_BUILDER, "context loop bounded");
                        Some(STAGE_ANSWER)
                    }
                } else {
                    Some(STAGE_ANSWER)
                }
            }
            STAGE_MEMORY_RETRIEVER => Some(STAGE_CONTEXT_BUILDER),
            STAGE_WORLD_MODIFIER => Some(STAGE_ANSWER),
            STAGE_ANSWER => Some(STAGE_REFLECT_TOPICS),
            STAGE_REFLECT_TOPICS => Some(STAGE_MEMORY_WRITER),
            _ => None,
        }
    }

    /// Emit `world_commit` and perform the single durable write when the
    /// world changed (deep-equal minus `updated_at`).
    fn commit_world(
        &self,
        pre_world: &WorldState,
        state: &mut TurnState,
        cx: &StageContext,
    ) -> std::result::Result<(), String> {
        let diff = WorldDiff::between(pre_world, &state.world);
        if diff.is_empty() {
            return Ok(());
        }
        cx.emitter.emit(EventPayload::WorldCommit { diff });
        self.world_file
            .commit(&mut state.world)
            .map_err(|e| format!("world commit failed: {e}"))
    }
}

fn classify_error(e: &Error) -> EndReason {
    match e {
        Error::Http(_) | Error::Timeout(_) | Error::Provider { .. } => EndReason::Transport,
        Error::Deadline => EndReason::Deadline,
        _ => EndReason::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert_eq!(
            classify_error(&Error::Http("boom".into())),
            EndReason::Transport
        );
        assert_eq!(
            classify_error(&Error::Timeout("slow".into())),
            EndReason::Transport
        );
        assert_eq!(
            classify_error(&Error::Other("bug".into())),
            EndReason::Internal
        );
        assert_eq!(classify_error(&Error::Deadline), EndReason::Deadline);
    }
}
