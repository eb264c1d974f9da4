//! Built-in tool handlers and the default skill wiring.
//!
//! Four tools back the whole stage catalogue:
//! `chat_history_tail` (read-only log tail), `memory_query` /
//! `memory_store` (remote store), and `world_apply_ops` (JSON-patch-style
//! mutation of the turn's working-copy world).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use cortex_domain::error::{Error, Result};
use cortex_domain::message::ToolDefinition;
use cortex_domain::world::{ChatRole, WorldState};
use cortex_memory::{MemoryQueryRequest, MemoryStoreRequest};

use crate::registry::{Skill, ToolEntry, ToolHandler, ToolRegistry, ToolResources};
use crate::stages::{
    STAGE_CONTEXT_BUILDER, STAGE_MEMORY_RETRIEVER, STAGE_MEMORY_WRITER, STAGE_WORLD_MODIFIER,
};
use crate::state::{EvidenceMeta, EvidencePacket};

// Skill names (startup constants).
pub const SKILL_CORE_CONTEXT: &str = "core_context";
pub const SKILL_CORE_WORLD: &str = "core_world";
pub const SKILL_MEMORY_READ: &str = "mcp_memory_read";
pub const SKILL_MEMORY_WRITE: &str = "mcp_memory_write";

// Tool names.
pub const TOOL_CHAT_TAIL: &str = "chat_history_tail";
pub const TOOL_MEMORY_QUERY: &str = "memory_query";
pub const TOOL_MEMORY_STORE: &str = "memory_store";
pub const TOOL_WORLD_APPLY_OPS: &str = "world_apply_ops";

// Allowed skills per tool-loop stage. The stages compose their toolsets
// from these, and `verify_wiring` rejects a configuration where a loop
// stage's allowlist no longer intersects the enabled set.
pub const CONTEXT_BUILDER_SKILLS: &[&str] = &[SKILL_CORE_CONTEXT, SKILL_MEMORY_READ];
pub const MEMORY_RETRIEVER_SKILLS: &[&str] = &[SKILL_MEMORY_READ];
pub const WORLD_MODIFIER_SKILLS: &[&str] = &[SKILL_CORE_WORLD];
pub const MEMORY_WRITER_SKILLS: &[&str] = &[SKILL_MEMORY_WRITE];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the registry with every built-in tool and skill registered.
pub fn builtin_registry(enabled_skills: BTreeSet<String>) -> ToolRegistry {
    let mut reg = ToolRegistry::new(enabled_skills);

    reg.register_tool(ToolEntry {
        definition: ToolDefinition {
            name: TOOL_CHAT_TAIL.into(),
            description: "Read the last N turns of the chat history log.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "description": "Max turns to return (default 10)" },
                    "roles": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["human", "assistant"] },
                        "description": "Restrict to these roles"
                    }
                }
            }),
        },
        handler: Arc::new(ChatHistoryTail),
        validator: Some(validate_turns_shape),
        deadline_ms: None,
    });

    reg.register_tool(ToolEntry {
        definition: ToolDefinition {
            name: TOOL_MEMORY_QUERY.into(),
            description: "Query long-term memory for relevant items.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "k": { "type": "integer", "description": "Max results" },
                    "filters": { "type": "object", "description": "Store-specific filters" }
                },
                "required": ["query"]
            }),
        },
        handler: Arc::new(MemoryQuery),
        validator: Some(validate_items_shape),
        deadline_ms: None,
    });

    reg.register_tool(ToolEntry {
        definition: ToolDefinition {
            name: TOOL_MEMORY_STORE.into(),
            description: "Persist one note or fact to long-term memory.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Content to store" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "meta": { "type": "object" }
                },
                "required": ["text"]
            }),
        },
        handler: Arc::new(MemoryPersist),
        validator: Some(validate_id_shape),
        deadline_ms: None,
    });

    reg.register_tool(ToolEntry {
        definition: ToolDefinition {
            name: TOOL_WORLD_APPLY_OPS.into(),
            description: "Apply set/append/remove operations to the working copy of the \
                          world state. Allowed paths: project, tz, topics, goals, rules, \
                          identity.<field>. Returns the updated world."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "ops": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "op": { "type": "string", "enum": ["set", "append", "remove"] },
                                "path": { "type": "string" },
                                "value": {}
                            },
                            "required": ["op", "path"]
                        }
                    }
                },
                "required": ["ops"]
            }),
        },
        handler: Arc::new(WorldApplyOps),
        validator: None,
        deadline_ms: None,
    });

    reg.register_skill(Skill {
        name: SKILL_CORE_CONTEXT.into(),
        tools: vec![TOOL_CHAT_TAIL.into()],
    });
    reg.register_skill(Skill {
        name: SKILL_CORE_WORLD.into(),
        tools: vec![TOOL_WORLD_APPLY_OPS.into()],
    });
    reg.register_skill(Skill {
        name: SKILL_MEMORY_READ.into(),
        tools: vec![TOOL_MEMORY_QUERY.into()],
    });
    reg.register_skill(Skill {
        name: SKILL_MEMORY_WRITE.into(),
        tools: vec![TOOL_MEMORY_STORE.into()],
    });

    reg.register_loop_stage(STAGE_CONTEXT_BUILDER, CONTEXT_BUILDER_SKILLS);
    reg.register_loop_stage(STAGE_MEMORY_RETRIEVER, MEMORY_RETRIEVER_SKILLS);
    reg.register_loop_stage(STAGE_WORLD_MODIFIER, WORLD_MODIFIER_SKILLS);
    reg.register_loop_stage(STAGE_MEMORY_WRITER, MEMORY_WRITER_SKILLS);

    reg
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result validators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn validate_turns_shape(v: &Value) -> std::result::Result<(), String> {
    match v.get("turns").map(Value::is_array) {
        Some(true) => Ok(()),
        _ => Err("result is missing a \"turns\" array".into()),
    }
}

fn validate_items_shape(v: &Value) -> std::result::Result<(), String> {
    match v.get("items").map(Value::is_array) {
        Some(true) => Ok(()),
        _ => Err("result is missing an \"items\" array".into()),
    }
}

fn validate_id_shape(v: &Value) -> std::result::Result<(), String> {
    match v.get("id").map(Value::is_string) {
        Some(true) => Ok(()),
        _ => Err("result is missing an \"id\" string".into()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Evidence mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wrap a successful read-tool result into the canonical packet appended
/// to `context.sources`. Write tools produce no evidence.
pub fn evidence_from(tool_name: &str, args_digest: &str, result: &Value) -> Option<EvidencePacket> {
    let (kind, items_key) = match tool_name {
        TOOL_CHAT_TAIL => ("chat_turns", "turns"),
        TOOL_MEMORY_QUERY => ("memories", "items"),
        _ => return None,
    };
    let items = result
        .get(items_key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Some(EvidencePacket {
        kind: kind.to_string(),
        title: None,
        items,
        meta: EvidenceMeta {
            tool: tool_name.to_string(),
            ts: Utc::now().to_rfc3339(),
            args_digest: args_digest.to_string(),
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// chat_history_tail
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ChatHistoryTail;

#[async_trait::async_trait]
impl ToolHandler for ChatHistoryTail {
    async fn call(&self, args: &Value, res: &ToolResources) -> Result<Value> {
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
        let roles: Option<Vec<ChatRole>> = args.get("roles").and_then(Value::as_array).map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .filter_map(|s| match s {
                    "human" => Some(ChatRole::Human),
                    "assistant" => Some(ChatRole::Assistant),
                    _ => None,
                })
                .collect()
        });

        let turns = res.chat.tail(limit, roles.as_deref())?;
        let items: Vec<Value> = turns
            .iter()
            .map(|t| {
                json!({
                    "ts": t.ts,
                    "role": t.role,
                    "content": t.content,
                })
            })
            .collect();
        Ok(json!({ "turns": items }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// memory_query / memory_store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct MemoryQuery;

#[async_trait::async_trait]
impl ToolHandler for MemoryQuery {
    async fn call(&self, args: &Value, res: &ToolResources) -> Result<Value> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Other("memory_query requires a \"query\" string".into()))?
            .to_string();
        let req = MemoryQueryRequest {
            query,
            k: args.get("k").and_then(Value::as_u64).map(|v| v as u32),
            filters: args.get("filters").cloned(),
        };
        let resp = res.memory.query(req).await?;
        Ok(serde_json::to_value(resp)?)
    }
}

struct MemoryPersist;

#[async_trait::async_trait]
impl ToolHandler for MemoryPersist {
    async fn call(&self, args: &Value, res: &ToolResources) -> Result<Value> {
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Other("memory_store requires a \"text\" string".into()))?
            .to_string();
        let tags = args
            .get("tags")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let req = MemoryStoreRequest {
            text,
            tags,
            meta: args.get("meta").cloned(),
        };
        let resp = res.memory.store(req).await?;
        Ok(serde_json::to_value(resp)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// world_apply_ops
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct WorldApplyOps;

#[async_trait::async_trait]
impl ToolHandler for WorldApplyOps {
    async fn call(&self, args: &Value, res: &ToolResources) -> Result<Value> {
        let ops = args
            .get("ops")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Other("world_apply_ops requires an \"ops\" array".into()))?;

        // Work on a detached copy; commit to the working world only when
        // every op applied.
        let mut world: WorldState = res.world.lock().clone();
        let mut obj = match serde_json::to_value(&world)? {
            Value::Object(m) => m,
            _ => return Err(Error::Other("world did not serialize to an object".into())),
        };

        for op in ops {
            let kind = op.get("op").and_then(Value::as_str).unwrap_or("");
            let path = op.get("path").and_then(Value::as_str).unwrap_or("");
            let value = op.get("value");
            if let Err(failure) = apply_world_op(&mut obj, kind, path, value) {
                return Ok(failure);
            }
        }

        world = serde_json::from_value(Value::Object(obj.clone()))
            .map_err(|e| Error::Other(format!("ops produced an invalid world: {e}")))?;
        *res.world.lock() = world;
        Ok(json!({ "world": Value::Object(obj) }))
    }
}

const ARRAY_PATHS: [&str; 3] = ["topics", "goals", "rules"];
const IDENTITY_FIELDS: [&str; 4] = [
    "user_name",
    "session_user_name",
    "agent_name",
    "user_location",
];

fn forbidden(path: &str) -> Value {
    json!({
        "ok": false,
        "error": { "kind": "forbidden_path", "message": format!("path \"{path}\" is not writable") }
    })
}

fn bad_op(message: String) -> Value {
    json!({
        "ok": false,
        "error": { "kind": "bad_op", "message": message }
    })
}

/// Apply one op to the serialized world object. `Err` carries the
/// result value the model should see (forbidden path / bad op).
fn apply_world_op(
    obj: &mut serde_json::Map<String, Value>,
    kind: &str,
    path: &str,
    value: Option<&Value>,
) -> std::result::Result<(), Value> {
    let (head, rest) = match path.split_once('.') {
        Some((h, r)) => (h, Some(r)),
        None => (path, None),
    };

    match (head, rest) {
        ("project", None) | ("tz", None) => match kind {
            "set" => {
                let v = value.ok_or_else(|| bad_op(format!("set {path} requires a value")))?;
                if !v.is_string() && !(head == "tz" && v.is_null()) {
                    return Err(bad_op(format!("{path} must be a string")));
                }
                obj.insert(head.to_string(), v.clone());
                Ok(())
            }
            "remove" => {
                let reset = if head == "tz" {
                    Value::Null
                } else {
                    Value::String(String::new())
                };
                obj.insert(head.to_string(), reset);
                Ok(())
            }
            "append" => Err(bad_op(format!("cannot append to scalar \"{path}\""))),
            other => Err(bad_op(format!("unknown op \"{other}\""))),
        },
        (field, None) if ARRAY_PATHS.contains(&field) => {
            let entry = obj
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let arr = entry
                .as_array_mut()
                .ok_or_else(|| bad_op(format!("\"{field}\" is not an array")))?;
            match kind {
                "set" => {
                    let v = value.ok_or_else(|| bad_op(format!("set {field} requires a value")))?;
                    let new = v
                        .as_array()
                        .ok_or_else(|| bad_op(format!("set {field} requires an array value")))?;
                    if field == "topics" && !new.iter().all(Value::is_string) {
                        return Err(bad_op("topics must be strings".into()));
                    }
                    *arr = new.clone();
                    Ok(())
                }
                "append" => {
                    let v =
                        value.ok_or_else(|| bad_op(format!("append {field} requires a value")))?;
                    if field == "topics" && !v.is_string() {
                        return Err(bad_op("topics must be strings".into()));
                    }
                    arr.push(v.clone());
                    Ok(())
                }
                "remove" => {
                    match value {
                        Some(v) => arr.retain(|item| item != v),
                        None => arr.clear(),
                    }
                    Ok(())
                }
                other => Err(bad_op(format!("unknown op \"{other}\""))),
            }
        }
        ("identity", Some(field)) if IDENTITY_FIELDS.contains(&field) => {
            let identity = obj
                .entry("identity".to_string())
                .or_insert_with(|| json!({}));
            let map = identity
                .as_object_mut()
                .ok_or_else(|| bad_op("\"identity\" is not an object".into()))?;
            match kind {
                "set" => {
                    let v = value.ok_or_else(|| bad_op(format!("set {path} requires a value")))?;
                    if !v.is_string() {
                        return Err(bad_op(format!("{path} must be a string")));
                    }
                    map.insert(field.to_string(), v.clone());
                    Ok(())
                }
                "remove" => {
                    map.insert(field.to_string(), Value::String(String::new()));
                    Ok(())
                }
                "append" => Err(bad_op(format!("cannot append to scalar \"{path}\""))),
                other => Err(bad_op(format!("unknown op \"{other}\""))),
            }
        }
        _ => Err(forbidden(path)),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_domain::world::ChatTurn;
    use cortex_memory::NoopMemoryStore;
    use cortex_store::ChatLog;
    use tempfile::TempDir;

    fn resources(dir: &TempDir) -> ToolResources {
        ToolResources::new(
            Arc::new(ChatLog::new(dir.path().join("chat.jsonl"), None)),
            Arc::new(NoopMemoryStore),
            WorldState::default(),
            "default",
        )
    }

    async fn run_world_ops(res: &ToolResources, ops: Value) -> Value {
        WorldApplyOps
            .call(&json!({ "ops": ops }), res)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn chat_tail_reads_log() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        res.chat.append(&ChatTurn::now(ChatRole::Human, "q1")).unwrap();
        res.chat
            .append(&ChatTurn::now(ChatRole::Assistant, "a1"))
            .unwrap();

        let out = ChatHistoryTail
            .call(&json!({"limit": 1}), &res)
            .await
            .unwrap();
        let turns = out["turns"].as_array().unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0]["content"], "a1");
        assert!(validate_turns_shape(&out).is_ok());
    }

    #[tokio::test]
    async fn chat_tail_role_filter() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        res.chat.append(&ChatTurn::now(ChatRole::Human, "q")).unwrap();
        res.chat
            .append(&ChatTurn::now(ChatRole::Assistant, "a"))
            .unwrap();

        let out = ChatHistoryTail
            .call(&json!({"limit": 10, "roles": ["human"]}), &res)
            .await
            .unwrap();
        let turns = out["turns"].as_array().unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0]["role"], "human");
    }

    #[tokio::test]
    async fn memory_query_requires_query() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        let err = MemoryQuery.call(&json!({}), &res).await.unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test]
    async fn memory_query_noop_returns_empty_items() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        let out = MemoryQuery
            .call(&json!({"query": "trip"}), &res)
            .await
            .unwrap();
        assert_eq!(out["items"], json!([]));
        assert!(validate_items_shape(&out).is_ok());
    }

    #[tokio::test]
    async fn world_set_project() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        let out =
            run_world_ops(&res, json!([{"op": "set", "path": "project", "value": "aurora"}]))
                .await;
        assert_eq!(out["world"]["project"], "aurora");
        assert_eq!(res.world.lock().project, "aurora");
    }

    #[tokio::test]
    async fn world_append_topic() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        run_world_ops(&res, json!([{"op": "append", "path": "topics", "value": "trip"}])).await;
        run_world_ops(&res, json!([{"op": "append", "path": "topics", "value": "work"}])).await;
        assert_eq!(
            res.world.lock().topics,
            vec!["trip".to_string(), "work".to_string()]
        );
    }

    #[tokio::test]
    async fn world_remove_topic_by_value() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        res.world.lock().topics = vec!["trip".into(), "work".into()];
        run_world_ops(&res, json!([{"op": "remove", "path": "topics", "value": "trip"}])).await;
        assert_eq!(res.world.lock().topics, vec!["work".to_string()]);
    }

    #[tokio::test]
    async fn world_set_identity_field() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        run_world_ops(
            &res,
            json!([{"op": "set", "path": "identity.user_name", "value": "Evert"}]),
        )
        .await;
        assert_eq!(res.world.lock().identity.user_name, "Evert");
    }

    #[tokio::test]
    async fn world_forbidden_path_rejected_without_mutation() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        let out = run_world_ops(
            &res,
            json!([
                {"op": "set", "path": "project", "value": "aurora"},
                {"op": "set", "path": "schema_version", "value": 99}
            ]),
        )
        .await;
        assert_eq!(out["ok"], false);
        assert_eq!(out["error"]["kind"], "forbidden_path");
        // The batch is atomic: the first op must not have leaked through.
        assert_eq!(res.world.lock().project, "");
    }

    #[tokio::test]
    async fn world_append_to_scalar_is_bad_op() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        let out =
            run_world_ops(&res, json!([{"op": "append", "path": "project", "value": "x"}])).await;
        assert_eq!(out["ok"], false);
        assert_eq!(out["error"]["kind"], "bad_op");
    }

    #[tokio::test]
    async fn world_non_string_topic_rejected() {
        let dir = TempDir::new().unwrap();
        let res = resources(&dir);
        let out =
            run_world_ops(&res, json!([{"op": "append", "path": "topics", "value": 42}])).await;
        assert_eq!(out["error"]["kind"], "bad_op");
        assert!(res.world.lock().topics.is_empty());
    }

    #[test]
    fn evidence_mapping_covers_read_tools() {
        let result = json!({"turns": [{"role": "human", "content": "hi"}]});
        let packet = evidence_from(TOOL_CHAT_TAIL, "abc123", &result).unwrap();
        assert_eq!(packet.kind, "chat_turns");
        assert_eq!(packet.items.len(), 1);
        assert_eq!(packet.meta.args_digest, "abc123");

        let result = json!({"items": []});
        let packet = evidence_from(TOOL_MEMORY_QUERY, "d", &result).unwrap();
        assert_eq!(packet.kind, "memories");

        assert!(evidence_from(TOOL_MEMORY_STORE, "d", &json!({"id": "1"})).is_none());
        assert!(evidence_from(TOOL_WORLD_APPLY_OPS, "d", &json!({})).is_none());
    }

    #[test]
    fn builtin_registry_wiring_is_complete() {
        let enabled: BTreeSet<String> = [
            SKILL_CORE_CONTEXT,
            SKILL_CORE_WORLD,
            SKILL_MEMORY_READ,
            SKILL_MEMORY_WRITE,
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let reg = builtin_registry(enabled);
        assert!(reg.verify_wiring().is_ok());

        let ts = reg.toolset_for(CONTEXT_BUILDER_SKILLS);
        assert_eq!(ts.names(), vec![TOOL_CHAT_TAIL, TOOL_MEMORY_QUERY]);
    }

    #[test]
    fn disabling_a_loop_stage_skill_fails_the_wiring_check() {
        // core_world disabled while world_modifier still requires it:
        // this must fail at startup, not degrade to a toolless loop.
        let enabled: BTreeSet<String> =
            [SKILL_CORE_CONTEXT, SKILL_MEMORY_READ, SKILL_MEMORY_WRITE]
                .into_iter()
                .map(String::from)
                .collect();
        let reg = builtin_registry(enabled);
        let err = reg.verify_wiring().unwrap_err();
        assert!(err.to_string().contains(STAGE_WORLD_MODIFIER));
        assert!(err.to_string().contains(SKILL_CORE_WORLD));
    }
}
