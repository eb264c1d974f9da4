//! The Cortex turn-orchestration core.
//!
//! One turn = one user message driven through a fixed conditional graph of
//! LLM-backed stages (router → context assembly → answer → reflection →
//! memory persistence). Each stage's provider call is mediated by a
//! deterministic streaming tool loop under a capability firewall, and
//! everything the turn does is observable on a typed per-turn event
//! stream.
//!
//! Entry point: [`Controller::submit_turn`].

pub mod cancel;
pub mod controller;
pub mod digest;
pub mod emitter;
pub mod extract;
pub mod graph;
pub mod prompt;
pub mod registry;
pub mod stages;
pub mod state;
pub mod tool_loop;
pub mod toolbox;

pub use cancel::{CancelMap, CancelToken};
pub use controller::{Controller, TurnHandle};
pub use emitter::{Emitter, EventStream};
pub use registry::{ProviderSet, RoleParams, ToolRegistry, ToolResources};
pub use state::TurnState;
