//! Tool registry, skills, and the capability firewall.
//!
//! A tool is a named capability with a JSON-schema'd argument shape, a
//! host-side handler, and an optional result validator. Skills bundle
//! tool names; a stage's toolset is the union of the tools of its allowed
//! skills intersected with the enabled-skill set. Composition is pure and
//! cached.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use cortex_domain::error::{Error, Result};
use cortex_domain::message::ToolDefinition;
use cortex_domain::world::WorldState;
use cortex_memory::MemoryStore;
use cortex_providers::ChatProvider;
use cortex_store::ChatLog;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool resources
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The bundle handed to every tool handler.
///
/// Built once per turn. `world` is the working copy world tools mutate;
/// the executor copies it back into the turn state when the owning stage
/// commits, so durable storage is never touched from a handler.
pub struct ToolResources {
    pub chat: Arc<ChatLog>,
    pub memory: Arc<dyn MemoryStore>,
    pub world: Mutex<WorldState>,
    pub user_namespace: String,
}

impl ToolResources {
    pub fn new(
        chat: Arc<ChatLog>,
        memory: Arc<dyn MemoryStore>,
        world: WorldState,
        user_namespace: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            memory,
            world: Mutex::new(world),
            user_namespace: user_namespace.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers and entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A host-side tool implementation.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: &Value, resources: &ToolResources) -> Result<Value>;
}

/// Optional post-hoc check on a handler's successful result.
pub type Validator = fn(&Value) -> std::result::Result<(), String>;

#[derive(Clone)]
pub struct ToolEntry {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
    pub validator: Option<Validator>,
    /// Per-tool deadline override; falls back to `limits.tool_deadline_ms`.
    pub deadline_ms: Option<u64>,
}

/// A named bundle of tool names.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub tools: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Toolset
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The composed, ordered capability set one stage invocation sees.
#[derive(Clone, Default)]
pub struct Toolset {
    entries: BTreeMap<String, ToolEntry>,
}

impl Toolset {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    /// Schemas in deterministic (name) order, for the provider request.
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        self.entries.values().map(|e| e.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Single source of truth for skills and tool wiring.
pub struct ToolRegistry {
    tools: HashMap<String, ToolEntry>,
    skills: HashMap<String, Skill>,
    enabled_skills: BTreeSet<String>,
    /// Tool-loop stages and their allowed skills, checked at startup.
    loop_stages: Vec<(String, Vec<String>)>,
    toolset_cache: Mutex<HashMap<String, Arc<Toolset>>>,
}

impl ToolRegistry {
    pub fn new(enabled_skills: BTreeSet<String>) -> Self {
        Self {
            tools: HashMap::new(),
            skills: HashMap::new(),
            enabled_skills,
            loop_stages: Vec::new(),
            toolset_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_tool(&mut self, entry: ToolEntry) {
        self.tools.insert(entry.definition.name.clone(), entry);
    }

    pub fn register_skill(&mut self, skill: Skill) {
        self.skills.insert(skill.name.clone(), skill);
    }

    /// Declare a `tools_policy = loop` stage and its allowed skills so
    /// the wiring check can reject a configuration that would silently
    /// hand it an empty toolset.
    pub fn register_loop_stage(&mut self, stage_id: impl Into<String>, allowed_skills: &[&str]) {
        self.loop_stages.push((
            stage_id.into(),
            allowed_skills.iter().map(|s| s.to_string()).collect(),
        ));
    }

    pub fn enabled_skills(&self) -> &BTreeSet<String> {
        &self.enabled_skills
    }

    /// `toolset(stage) = ⋃ tools[s] for s in allowed ∩ enabled`.
    ///
    /// Pure; cached on the allowed-skill key.
    pub fn toolset_for(&self, allowed_skills: &[&str]) -> Arc<Toolset> {
        let key = allowed_skills.join("+");
        if let Some(cached) = self.toolset_cache.lock().get(&key) {
            return cached.clone();
        }

        let mut entries = BTreeMap::new();
        for skill_name in allowed_skills {
            if !self.enabled_skills.contains(*skill_name) {
                continue;
            }
            let Some(skill) = self.skills.get(*skill_name) else {
                continue;
            };
            for tool_name in &skill.tools {
                if let Some(entry) = self.tools.get(tool_name) {
                    entries.insert(tool_name.clone(), entry.clone());
                }
            }
        }

        let toolset = Arc::new(Toolset { entries });
        self.toolset_cache.lock().insert(key, toolset.clone());
        toolset
    }

    /// Startup assertion: every enabled skill exists, every tool it
    /// references has a registered schema + handler, and every tool-loop
    /// stage keeps at least one allowed skill in the enabled set.
    pub fn verify_wiring(&self) -> Result<()> {
        for skill_name in &self.enabled_skills {
            let skill = self.skills.get(skill_name).ok_or_else(|| {
                Error::Config(format!("enabled skill \"{skill_name}\" is not registered"))
            })?;
            for tool_name in &skill.tools {
                if !self.tools.contains_key(tool_name) {
                    return Err(Error::Config(format!(
                        "skill \"{skill_name}\" references unregistered tool \"{tool_name}\""
                    )));
                }
            }
        }

        for (stage_id, allowed) in &self.loop_stages {
            if !allowed.iter().any(|s| self.enabled_skills.contains(s)) {
                return Err(Error::Config(format!(
                    "tool-loop stage \"{stage_id}\" has no allowed skill in the enabled set \
                     (allowed: {allowed:?}); enable one of its skills or remove the stage"
                )));
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers per role
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Model + sampling parameters for one role key.
#[derive(Debug, Clone)]
pub struct RoleParams {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// role key → (provider, params).
#[derive(Default)]
pub struct ProviderSet {
    roles: HashMap<String, (Arc<dyn ChatProvider>, RoleParams)>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        role: impl Into<String>,
        provider: Arc<dyn ChatProvider>,
        params: RoleParams,
    ) {
        self.roles.insert(role.into(), (provider, params));
    }

    pub fn for_role(&self, role: &str) -> Result<(Arc<dyn ChatProvider>, RoleParams)> {
        self.roles
            .get(role)
            .map(|(p, params)| (p.clone(), params.clone()))
            .ok_or_else(|| Error::Config(format!("no provider configured for role \"{role}\"")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, args: &Value, _res: &ToolResources) -> Result<Value> {
            Ok(args.clone())
        }
    }

    fn entry(name: &str) -> ToolEntry {
        ToolEntry {
            definition: ToolDefinition {
                name: name.into(),
                description: "test tool".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            handler: Arc::new(EchoHandler),
            validator: None,
            deadline_ms: None,
        }
    }

    fn registry() -> ToolRegistry {
        let enabled: BTreeSet<String> =
            ["alpha", "beta"].into_iter().map(String::from).collect();
        let mut reg = ToolRegistry::new(enabled);
        reg.register_tool(entry("a_tool"));
        reg.register_tool(entry("b_tool"));
        reg.register_skill(Skill {
            name: "alpha".into(),
            tools: vec!["a_tool".into()],
        });
        reg.register_skill(Skill {
            name: "beta".into(),
            tools: vec!["b_tool".into()],
        });
        reg.register_skill(Skill {
            name: "gamma".into(),
            tools: vec!["a_tool".into()],
        });
        reg
    }

    #[test]
    fn toolset_is_union_of_allowed_and_enabled() {
        let reg = registry();
        let ts = reg.toolset_for(&["alpha", "beta"]);
        assert_eq!(ts.names(), vec!["a_tool", "b_tool"]);
    }

    #[test]
    fn disabled_skill_is_filtered_out() {
        let reg = registry();
        // gamma is registered but not enabled.
        let ts = reg.toolset_for(&["gamma"]);
        assert!(ts.is_empty());
    }

    #[test]
    fn unknown_allowed_skill_is_ignored() {
        let reg = registry();
        let ts = reg.toolset_for(&["alpha", "nope"]);
        assert_eq!(ts.names(), vec!["a_tool"]);
    }

    #[test]
    fn toolset_is_cached() {
        let reg = registry();
        let first = reg.toolset_for(&["alpha"]);
        let second = reg.toolset_for(&["alpha"]);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn verify_wiring_ok_for_complete_registry() {
        assert!(registry().verify_wiring().is_ok());
    }

    #[test]
    fn verify_wiring_rejects_missing_skill() {
        let enabled: BTreeSet<String> = ["ghost"].into_iter().map(String::from).collect();
        let reg = ToolRegistry::new(enabled);
        let err = reg.verify_wiring().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn verify_wiring_accepts_loop_stage_with_enabled_skill() {
        let mut reg = registry();
        // One enabled skill in the allowlist is enough.
        reg.register_loop_stage("context_builder", &["alpha", "gamma"]);
        assert!(reg.verify_wiring().is_ok());
    }

    #[test]
    fn verify_wiring_rejects_loop_stage_with_no_enabled_skill() {
        let mut reg = registry();
        // gamma is registered but not in the enabled set.
        reg.register_loop_stage("world_modifier", &["gamma"]);
        let err = reg.verify_wiring().unwrap_err();
        assert!(err.to_string().contains("world_modifier"));
        assert!(err.to_string().contains("gamma"));
    }

    #[test]
    fn verify_wiring_rejects_missing_tool() {
        let enabled: BTreeSet<String> = ["alpha"].into_iter().map(String::from).collect();
        let mut reg = ToolRegistry::new(enabled);
        reg.register_skill(Skill {
            name: "alpha".into(),
            tools: vec!["not_registered".into()],
        });
        let err = reg.verify_wiring().unwrap_err();
        assert!(err.to_string().contains("not_registered"));
    }

    #[test]
    fn schemas_are_name_ordered() {
        let reg = registry();
        let ts = reg.toolset_for(&["beta", "alpha"]);
        let names: Vec<String> = ts.schemas().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a_tool", "b_tool"]);
    }
}
