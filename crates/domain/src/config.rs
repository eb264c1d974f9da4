//! Construction-time configuration for the controller.
//!
//! Loaded from TOML by the binary and injected into `Controller::new`.
//! Every section defaults so a minimal file only needs the paths and the
//! provider endpoint.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// The four role keys every deployment must cover.
pub const ROLE_KEYS: [&str; 4] = ["router", "planner", "reflect", "answer"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "d_world_state_path")]
    pub world_state_path: PathBuf,
    #[serde(default = "d_chat_history_path")]
    pub chat_history_path: PathBuf,
    /// Memory tenant identifier. Always sourced from this field, never
    /// derived from an API key or other credential.
    #[serde(default = "d_user_namespace")]
    pub user_namespace: String,
    /// Role key → model selection. Must cover [`ROLE_KEYS`].
    #[serde(default)]
    pub role_models: BTreeMap<String, RoleModel>,
    #[serde(default = "d_enabled_skills")]
    pub enabled_skills: BTreeSet<String>,
    #[serde(default = "d_prompt_dir")]
    pub prompt_dir: PathBuf,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default = "d_provider_endpoint")]
    pub provider_endpoint: String,
    /// Absent → memory tools become no-ops.
    #[serde(default)]
    pub memory_endpoint: Option<String>,
    /// IANA timezone name stamped on turns (e.g. "Europe/Amsterdam").
    #[serde(default = "d_timezone")]
    pub timezone: String,
    /// Optional line-count cap on the chat history log (copy-compact).
    #[serde(default)]
    pub chat_max_lines: Option<usize>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            world_state_path: d_world_state_path(),
            chat_history_path: d_chat_history_path(),
            user_namespace: d_user_namespace(),
            role_models: BTreeMap::new(),
            enabled_skills: d_enabled_skills(),
            prompt_dir: d_prompt_dir(),
            limits: Limits::default(),
            provider_endpoint: d_provider_endpoint(),
            memory_endpoint: None,
            timezone: d_timezone(),
            chat_max_lines: None,
        }
    }
}

fn d_world_state_path() -> PathBuf {
    "world_state.json".into()
}
fn d_chat_history_path() -> PathBuf {
    "chat_history.jsonl".into()
}
fn d_user_namespace() -> String {
    "default".into()
}
fn d_prompt_dir() -> PathBuf {
    "prompts".into()
}
fn d_provider_endpoint() -> String {
    "http://127.0.0.1:8080/v1".into()
}
fn d_timezone() -> String {
    "UTC".into()
}
fn d_enabled_skills() -> BTreeSet<String> {
    ["core_context", "core_world", "mcp_memory_read", "mcp_memory_write"]
        .into_iter()
        .map(String::from)
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Role models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleModel {
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Limits {
    /// Context-builder ⇄ memory-retriever round-trips per turn.
    #[serde(default = "d_context_rounds")]
    pub context_rounds: u32,
    /// Tool-loop rounds per stage invocation.
    #[serde(default = "d_tool_rounds")]
    pub tool_rounds: u32,
    #[serde(default = "d_turn_deadline_ms")]
    pub turn_deadline_ms: u64,
    #[serde(default = "d_tool_deadline_ms")]
    pub tool_deadline_ms: u64,
    /// Per-subscriber event buffer before lossy overflow.
    #[serde(default = "d_emitter_buffer")]
    pub emitter_buffer: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            context_rounds: d_context_rounds(),
            tool_rounds: d_tool_rounds(),
            turn_deadline_ms: d_turn_deadline_ms(),
            tool_deadline_ms: d_tool_deadline_ms(),
            emitter_buffer: d_emitter_buffer(),
        }
    }
}

fn d_context_rounds() -> u32 {
    3
}
fn d_tool_rounds() -> u32 {
    8
}
fn d_turn_deadline_ms() -> u64 {
    120_000
}
fn d_tool_deadline_ms() -> u64 {
    15_000
}
fn d_emitter_buffer() -> usize {
    4096
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn valid_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl CoreConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut error = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        };

        if self.user_namespace.is_empty() {
            error("user_namespace", "must not be empty".into());
        }
        if self.world_state_path.as_os_str().is_empty() {
            error("world_state_path", "must not be empty".into());
        }
        if self.chat_history_path.as_os_str().is_empty() {
            error("chat_history_path", "must not be empty".into());
        }
        if !valid_url(&self.provider_endpoint) {
            error(
                "provider_endpoint",
                format!(
                    "must start with http:// or https:// (got \"{}\")",
                    self.provider_endpoint
                ),
            );
        }
        if let Some(ref url) = self.memory_endpoint {
            if !valid_url(url) {
                error(
                    "memory_endpoint",
                    format!("must start with http:// or https:// (got \"{url}\")"),
                );
            }
        }

        for role in ROLE_KEYS {
            if !self.role_models.contains_key(role) {
                error(
                    &format!("role_models.{role}"),
                    format!("role \"{role}\" has no model configured"),
                );
            }
        }

        if self.limits.context_rounds == 0 {
            error("limits.context_rounds", "must be greater than 0".into());
        }
        if self.limits.tool_rounds == 0 {
            error("limits.tool_rounds", "must be greater than 0".into());
        }
        if self.limits.emitter_buffer == 0 {
            error("limits.emitter_buffer", "must be greater than 0".into());
        }

        if self.memory_endpoint.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "memory_endpoint".into(),
                message: "not set — memory tools will be no-ops".into(),
            });
        }
        if self.enabled_skills.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "enabled_skills".into(),
                message: "empty — tool-loop stages will fail the startup wiring check".into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
