//! Shared test harness: a scripted provider, a recording memory store,
//! and a fully wired executor over temp-dir stores.
#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use cortex_domain::config::Limits;
use cortex_domain::error::Result;
use cortex_domain::event::TurnEvent;
use cortex_domain::message::ToolCall;
use cortex_domain::stream::{BoxStream, FinishReason, StreamEvent, Usage};
use cortex_domain::world::WorldState;
use cortex_memory::{
    MemoryQueryRequest, MemoryQueryResponse, MemoryStore, MemoryStoreRequest, MemoryStoreResponse,
    MemoryItem,
};
use cortex_providers::{ChatProvider, ChatRequest};
use cortex_store::{ChatLog, WorldFile};

use cortex_engine::graph::GraphExecutor;
use cortex_engine::prompt::PromptRenderer;
use cortex_engine::stages::StageContext;
use cortex_engine::state::{now_in_timezone, TurnState};
use cortex_engine::toolbox::builtin_registry;
use cortex_engine::{CancelToken, Emitter, ProviderSet, RoleParams, ToolResources};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One element of a scripted streaming response.
pub enum ScriptItem {
    Ev(StreamEvent),
    /// Fire this token mid-stream (cancellation scenarios).
    Cancel(CancelToken),
}

/// A provider that replays pre-scripted streams in call order.
#[derive(Default)]
pub struct FakeProvider {
    scripts: Mutex<VecDeque<Vec<ScriptItem>>>,
    pub calls: Mutex<Vec<ChatRequest>>,
}

impl FakeProvider {
    pub fn new(scripts: Vec<Vec<ScriptItem>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait::async_trait]
impl ChatProvider for FakeProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.calls.lock().push(req.clone());
        let items = self.scripts.lock().pop_front().unwrap_or_else(|| {
            vec![ScriptItem::Ev(StreamEvent::Finished {
                reason: FinishReason::Stop,
                usage: None,
            })]
        });
        let stream = async_stream::stream! {
            for item in items {
                match item {
                    ScriptItem::Ev(ev) => yield Ok(ev),
                    ScriptItem::Cancel(token) => token.cancel(),
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "fake"
    }
}

// Script-building helpers.

pub fn text(t: &str) -> ScriptItem {
    ScriptItem::Ev(StreamEvent::TextDelta { text: t.into() })
}

pub fn finish() -> ScriptItem {
    ScriptItem::Ev(StreamEvent::Finished {
        reason: FinishReason::Stop,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    })
}

pub fn finish_tools() -> ScriptItem {
    ScriptItem::Ev(StreamEvent::Finished {
        reason: FinishReason::ToolCalls,
        usage: None,
    })
}

pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> ScriptItem {
    ScriptItem::Ev(StreamEvent::ToolCallCompleted {
        call: ToolCall {
            call_id: id.into(),
            tool_name: name.into(),
            args_json: args.to_string(),
        },
    })
}

/// A reply that streams one text chunk then stops.
pub fn reply(t: &str) -> Vec<ScriptItem> {
    vec![text(t), finish()]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recording memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct RecordingMemory {
    pub queries: Mutex<Vec<MemoryQueryRequest>>,
    pub stores: Mutex<Vec<MemoryStoreRequest>>,
    pub canned: Vec<MemoryItem>,
}

impl RecordingMemory {
    pub fn with_items(texts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            canned: texts
                .iter()
                .enumerate()
                .map(|(i, t)| MemoryItem {
                    id: format!("m{i}"),
                    text: t.to_string(),
                    score: 0.9,
                    meta: None,
                })
                .collect(),
            ..Default::default()
        })
    }
}

#[async_trait::async_trait]
impl MemoryStore for RecordingMemory {
    async fn query(&self, req: MemoryQueryRequest) -> Result<MemoryQueryResponse> {
        self.queries.lock().push(req);
        Ok(MemoryQueryResponse {
            items: self.canned.clone(),
        })
    }

    async fn store(&self, req: MemoryStoreRequest) -> Result<MemoryStoreResponse> {
        let id = format!("stored-{}", self.stores.lock().len());
        self.stores.lock().push(req);
        Ok(MemoryStoreResponse { id })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const ALL_SKILLS: [&str; 4] = [
    "core_context",
    "core_world",
    "mcp_memory_read",
    "mcp_memory_write",
];

/// Minimal but token-exercising templates for all seven stages.
pub fn write_prompt_dir(dir: &std::path::Path) {
    let templates = [
        ("router", "Route for <<USER_TEXT>> at <<NOW_ISO>>. Topics: <<TOPICS>>. Evidence:\n<<EVIDENCE>>"),
        ("context_builder", "Plan context for <<USER_TEXT>>. So far:\n<<CONTEXT_SUMMARY>>"),
        ("memory_retriever", "Retrieve <<MEMORY_REQUEST>> for <<USER_TEXT>>."),
        ("world_modifier", "Edit world for <<USER_TEXT>>:\n<<WORLD>>"),
        ("answer", "Answer <<USER_TEXT>> in <<LANGUAGE>> using:\n<<CONTEXT>>\nIssues: <<ISSUES>>"),
        ("reflect_topics", "Update topics <<TOPICS>> after <<USER_TEXT>> / <<ANSWER>>."),
        ("memory_writer", "Persist from <<USER_TEXT>> / <<ANSWER>>. Evidence:\n<<EVIDENCE>>"),
    ];
    std::fs::create_dir_all(dir).unwrap();
    for (name, body) in templates {
        std::fs::write(dir.join(format!("{name}.txt")), body).unwrap();
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub provider: Arc<FakeProvider>,
    pub memory: Arc<RecordingMemory>,
    pub chat: Arc<ChatLog>,
    pub world_file: Arc<WorldFile>,
    pub executor: GraphExecutor,
    pub limits: Limits,
}

impl Harness {
    pub fn new(scripts: Vec<Vec<ScriptItem>>, memory: Arc<RecordingMemory>) -> Self {
        let dir = TempDir::new().unwrap();
        write_prompt_dir(&dir.path().join("prompts"));

        let chat = Arc::new(ChatLog::new(dir.path().join("chat_history.jsonl"), None));
        let world_file = Arc::new(WorldFile::new(dir.path().join("world_state.json")));
        let limits = Limits::default();
        let executor = GraphExecutor::new(world_file.clone(), chat.clone(), limits);

        Self {
            dir,
            provider: FakeProvider::new(scripts),
            memory,
            chat,
            world_file,
            executor,
            limits,
        }
    }

    pub fn provider_set(&self) -> ProviderSet {
        let mut set = ProviderSet::new();
        for role in ["router", "planner", "reflect", "answer"] {
            set.insert(
                role,
                self.provider.clone(),
                RoleParams {
                    model: "fake-model".into(),
                    temperature: Some(0.2),
                    max_tokens: None,
                },
            );
        }
        set
    }

    pub fn stage_context(&self, world: &WorldState, cancel: CancelToken, emitter: Emitter) -> StageContext {
        let registry = builtin_registry(
            ALL_SKILLS
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<_>>(),
        );
        StageContext {
            providers: Arc::new(self.provider_set()),
            prompts: Arc::new(PromptRenderer::new(self.dir.path().join("prompts"))),
            registry: Arc::new(registry),
            resources: Arc::new(ToolResources::new(
                self.chat.clone(),
                self.memory.clone(),
                world.clone(),
                "default",
            )),
            emitter,
            cancel,
            limits: self.limits,
        }
    }

    /// Run a full turn and return the final state plus every event.
    pub async fn run(&self, user_text: &str, world: WorldState) -> (TurnState, Vec<TurnEvent>) {
        self.run_with_cancel(user_text, world, CancelToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        user_text: &str,
        world: WorldState,
        cancel: CancelToken,
    ) -> (TurnState, Vec<TurnEvent>) {
        let (now_iso, tz) = now_in_timezone("UTC");
        let state = TurnState::new(user_text, world.clone(), now_iso, tz);
        let emitter = Emitter::new(state.runtime.turn_id.clone(), self.limits.emitter_buffer);
        let stream = emitter.subscribe();
        let cx = self.stage_context(&world, cancel, emitter.clone());

        let final_state = self.executor.run_turn(state, &cx).await;
        emitter.close();
        let events = stream.collect_all().await;
        (final_state, events)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event assertions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn kinds(events: &[TurnEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.payload.kind()).collect()
}

/// Universal event-stream properties every completed turn must satisfy.
pub fn assert_stream_properties(events: &[TurnEvent]) {
    assert!(!events.is_empty(), "a turn emits events");

    // Starts with turn_start at seq 1, ends with exactly one terminal.
    assert_eq!(events[0].payload.kind(), "turn_start");
    assert_eq!(events[0].seq, 1);
    let terminals: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.payload.kind(), "turn_end_ok" | "turn_end_error"))
        .collect();
    assert_eq!(terminals.len(), 1, "exactly one terminal event");
    assert_eq!(
        events.last().unwrap().payload.kind(),
        terminals[0].payload.kind()
    );

    // seq strictly increasing and contiguous.
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64 + 1, "seq must be contiguous");
    }

    // Every turn_id matches.
    let turn_id = &events[0].turn_id;
    assert!(events.iter().all(|e| &e.turn_id == turn_id));

    // node_start/node_end pairing, with stage events strictly inside.
    let mut open: Option<String> = None;
    for event in events {
        match &event.payload {
            cortex_domain::event::EventPayload::NodeStart { stage_id, .. } => {
                assert!(open.is_none(), "node spans must not nest");
                open = Some(stage_id.clone());
            }
            cortex_domain::event::EventPayload::NodeEnd { stage_id, .. } => {
                assert_eq!(open.as_deref(), Some(stage_id.as_str()));
                open = None;
            }
            cortex_domain::event::EventPayload::ToolCall { stage_id, .. }
            | cortex_domain::event::EventPayload::ToolResult { stage_id, .. } => {
                assert_eq!(
                    open.as_deref(),
                    Some(stage_id.as_str()),
                    "tool events must sit inside their stage's node span"
                );
            }
            _ => {}
        }
    }
    assert!(open.is_none(), "every node_start has a matching node_end");

    // tool_call/tool_result pairing by id.
    let calls: Vec<&String> = events
        .iter()
        .filter_map(|e| match &e.payload {
            cortex_domain::event::EventPayload::ToolCall { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    let results: Vec<&String> = events
        .iter()
        .filter_map(|e| match &e.payload {
            cortex_domain::event::EventPayload::ToolResult { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(calls, results, "every tool_call pairs with one tool_result");

    // At most one assistant stream span; deltas only inside it.
    let starts = events
        .iter()
        .filter(|e| e.payload.kind() == "assistant_stream_start")
        .count();
    let ends = events
        .iter()
        .filter(|e| e.payload.kind() == "assistant_stream_end")
        .count();
    assert!(starts <= 1);
    assert_eq!(starts, ends);
}

/// Concatenation of assistant deltas must equal the stream-end total.
pub fn assert_delta_concatenation(events: &[TurnEvent]) -> Option<String> {
    let mut concat = String::new();
    let mut total: Option<String> = None;
    for event in events {
        match &event.payload {
            cortex_domain::event::EventPayload::AssistantDelta { text } => concat.push_str(text),
            cortex_domain::event::EventPayload::AssistantStreamEnd { text_total } => {
                total = Some(text_total.clone());
            }
            _ => {}
        }
    }
    if let Some(total) = &total {
        assert_eq!(&concat, total, "delta concatenation equals text_total");
    }
    total
}
