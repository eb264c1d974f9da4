//! Durable world state and chat history line shapes.
//!
//! `WorldState` is the single JSON document the controller owns on disk.
//! The schema is append-tolerant: unknown fields survive a load/save cycle
//! via the flattened `extra` map.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current on-disk schema version.
pub const WORLD_SCHEMA_VERSION: u32 = 1;

fn d_schema_version() -> u32 {
    WORLD_SCHEMA_VERSION
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub session_user_name: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub user_location: String,
}

/// The durable, structured memory of project / topics / identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    #[serde(default = "d_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub goals: Vec<Value>,
    #[serde(default)]
    pub rules: Vec<Value>,
    #[serde(default)]
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
    /// Unknown fields, preserved across load/save.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            schema_version: WORLD_SCHEMA_VERSION,
            updated_at: Utc::now().to_rfc3339(),
            project: String::new(),
            topics: Vec::new(),
            goals: Vec::new(),
            rules: Vec::new(),
            identity: Identity::default(),
            tz: None,
            extra: serde_json::Map::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Human,
    Assistant,
}

/// One line in the append-only history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub ts: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ChatTurn {
    pub fn now(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            role,
            content: content.into(),
            meta: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// World diff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

/// Top-level-key delta between the pre-turn and post-turn world.
///
/// `updated_at` is excluded: it changes on every commit and carries no
/// information. Applying a diff is idempotent: `added`/`changed` assign
/// their `to` values, `removed` deletes keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldDiff {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub added: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub removed: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changed: BTreeMap<String, FieldChange>,
}

fn to_object(world: &WorldState) -> BTreeMap<String, Value> {
    match serde_json::to_value(world) {
        Ok(Value::Object(m)) => m.into_iter().collect(),
        _ => BTreeMap::new(),
    }
}

impl WorldDiff {
    /// Compute the delta between two world snapshots, ignoring `updated_at`.
    pub fn between(pre: &WorldState, post: &WorldState) -> Self {
        let pre_obj = to_object(pre);
        let post_obj = to_object(post);
        let mut diff = WorldDiff::default();

        for (key, post_val) in &post_obj {
            if key == "updated_at" {
                continue;
            }
            match pre_obj.get(key) {
                None => {
                    diff.added.insert(key.clone(), post_val.clone());
                }
                Some(pre_val) if pre_val != post_val => {
                    diff.changed.insert(
                        key.clone(),
                        FieldChange {
                            from: pre_val.clone(),
                            to: post_val.clone(),
                        },
                    );
                }
                Some(_) => {}
            }
        }
        for (key, pre_val) in &pre_obj {
            if key == "updated_at" {
                continue;
            }
            if !post_obj.contains_key(key) {
                diff.removed.insert(key.clone(), pre_val.clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Apply the diff to a world snapshot, returning the patched world.
    pub fn apply(&self, world: &WorldState) -> WorldState {
        let mut obj = match serde_json::to_value(world) {
            Ok(Value::Object(m)) => m,
            _ => serde_json::Map::new(),
        };
        for (key, val) in &self.added {
            obj.insert(key.clone(), val.clone());
        }
        for (key, change) in &self.changed {
            obj.insert(key.clone(), change.to.clone());
        }
        for key in self.removed.keys() {
            obj.remove(key);
        }
        serde_json::from_value(Value::Object(obj)).unwrap_or_else(|_| world.clone())
    }
}
