//! Per-turn controller glue: construction-time wiring and the public
//! invocation surface.
//!
//! `submit_turn` appends the user turn to the history log, copies the
//! durable world into a fresh `TurnState`, runs the graph executor on a
//! background task, and hands the caller the turn's event stream. Turns
//! are serialised per user namespace.

use std::sync::Arc;

use futures_util::FutureExt;
use uuid::Uuid;

use cortex_domain::config::{ConfigSeverity, CoreConfig};
use cortex_domain::error::{Error, Result};
use cortex_domain::event::{EndReason, EventPayload};
use cortex_domain::world::{ChatRole, ChatTurn};
use cortex_memory::{MemoryStore, NoopMemoryStore, RestMemoryClient};
use cortex_providers::OpenAiCompatProvider;
use cortex_store::{ChatLog, WorldFile};

use crate::cancel::{CancelMap, CancelToken};
use crate::emitter::{Emitter, EventStream};
use crate::graph::GraphExecutor;
use crate::prompt::PromptRenderer;
use crate::registry::{ProviderSet, RoleParams, ToolRegistry, ToolResources};
use crate::stages::StageContext;
use crate::state::{now_in_timezone, TurnState};
use crate::toolbox::builtin_registry;

/// Handle returned by [`Controller::submit_turn`].
pub struct TurnHandle {
    pub turn_id: String,
    pub events: EventStream,
}

pub struct Controller {
    config: CoreConfig,
    providers: Arc<ProviderSet>,
    memory: Arc<dyn MemoryStore>,
    chat: Arc<ChatLog>,
    world_file: Arc<WorldFile>,
    registry: Arc<ToolRegistry>,
    prompts: Arc<PromptRenderer>,
    executor: Arc<GraphExecutor>,
    cancel_map: Arc<CancelMap>,
    /// At most one turn per namespace runs at a time.
    turn_gate: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

impl Controller {
    /// Build the full stack against the configured endpoints.
    pub fn new(config: CoreConfig) -> Result<Self> {
        let mut providers = ProviderSet::new();
        for (role, rm) in &config.role_models {
            let provider = OpenAiCompatProvider::new(
                role.clone(),
                &config.provider_endpoint,
                None,
                rm.model.clone(),
            )?;
            providers.insert(
                role.clone(),
                Arc::new(provider),
                RoleParams {
                    model: rm.model.clone(),
                    temperature: rm.temperature,
                    max_tokens: rm.max_tokens,
                },
            );
        }

        let memory: Arc<dyn MemoryStore> = match &config.memory_endpoint {
            Some(endpoint) => Arc::new(RestMemoryClient::new(endpoint, &config.user_namespace)?),
            None => {
                tracing::info!("no memory endpoint configured, memory tools are no-ops");
                Arc::new(NoopMemoryStore)
            }
        };

        Self::with_parts(config, providers, memory)
    }

    /// Wiring seam for tests and embedders that bring their own provider
    /// and memory implementations.
    pub fn with_parts(
        config: CoreConfig,
        providers: ProviderSet,
        memory: Arc<dyn MemoryStore>,
    ) -> Result<Self> {
        let issues = config.validate();
        for issue in &issues {
            match issue.severity {
                ConfigSeverity::Warning => tracing::warn!("{issue}"),
                ConfigSeverity::Error => tracing::error!("{issue}"),
            }
        }
        if let Some(first_error) = issues
            .iter()
            .find(|i| i.severity == ConfigSeverity::Error)
        {
            return Err(Error::Config(first_error.to_string()));
        }

        let registry = builtin_registry(config.enabled_skills.clone());
        registry.verify_wiring()?;

        let chat = Arc::new(ChatLog::new(
            config.chat_history_path.clone(),
            config.chat_max_lines,
        ));
        let world_file = Arc::new(WorldFile::new(config.world_state_path.clone()));
        let prompts = Arc::new(PromptRenderer::new(config.prompt_dir.clone()));
        let executor = Arc::new(GraphExecutor::new(
            world_file.clone(),
            chat.clone(),
            config.limits,
        ));

        Ok(Self {
            config,
            providers: Arc::new(providers),
            memory,
            chat,
            world_file,
            registry: Arc::new(registry),
            prompts,
            executor,
            cancel_map: Arc::new(CancelMap::new()),
            turn_gate: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Submit one user message; events stream back on the handle.
    ///
    /// Returns immediately. The turn runs on a background task, gated so
    /// at most one turn per namespace is in flight; a caller that never
    /// drains the stream only loses non-essential events.
    pub fn submit_turn(&self, user_text: impl Into<String>, cancel: CancelToken) -> TurnHandle {
        let user_text = user_text.into();
        let turn_id = Uuid::new_v4().to_string();
        let emitter = Emitter::new(turn_id.clone(), self.config.limits.emitter_buffer);
        let events = emitter.subscribe();

        self.cancel_map
            .register(&self.config.user_namespace, cancel.clone());

        let chat = self.chat.clone();
        let world_file = self.world_file.clone();
        let executor = self.executor.clone();
        let providers = self.providers.clone();
        let prompts = self.prompts.clone();
        let registry = self.registry.clone();
        let memory = self.memory.clone();
        let cancel_map = self.cancel_map.clone();
        let gate = self.turn_gate.clone();
        let namespace = self.config.user_namespace.clone();
        let timezone = self.config.timezone.clone();
        let limits = self.config.limits;
        let tid = turn_id.clone();

        tokio::spawn(async move {
            let _running = gate.lock().await;

            // The user turn lands in history before the graph starts.
            if let Err(e) = chat.append(&ChatTurn::now(ChatRole::Human, &user_text)) {
                tracing::warn!(error = %e, "failed to append user turn to chat history");
            }

            let world = world_file.load();
            let (now_iso, tz) = now_in_timezone(&timezone);
            let mut state = TurnState::new(user_text, world.clone(), now_iso, tz);
            state.runtime.turn_id = tid;

            let resources = Arc::new(ToolResources::new(
                chat,
                memory,
                world,
                namespace.clone(),
            ));
            let cx = StageContext {
                providers,
                prompts,
                registry,
                resources,
                emitter: emitter.clone(),
                cancel,
                limits,
            };

            // Contain stage panics: they end the turn, not the process.
            let run = std::panic::AssertUnwindSafe(executor.run_turn(state, &cx)).catch_unwind();
            if run.await.is_err() {
                tracing::error!("turn panicked");
                emitter.emit(EventPayload::TurnEndError {
                    reason: EndReason::Internal,
                    message: "internal panic".into(),
                });
            }

            emitter.close();
            cancel_map.remove(&namespace);
        });

        TurnHandle { turn_id, events }
    }

    /// Cancel the namespace's running turn, if any.
    pub fn cancel_active_turn(&self) -> bool {
        self.cancel_map.cancel(&self.config.user_namespace)
    }

    /// Pull interface: the last `n` chat turns.
    pub fn read_chat_tail(&self, n: usize) -> Result<Vec<ChatTurn>> {
        self.chat.tail(n, None)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }
}
