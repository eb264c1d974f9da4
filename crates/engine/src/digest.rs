//! Argument digests for tool-trace events.

use sha2::{Digest as _, Sha256};

/// Length of the hex digest carried on `tool_call` events.
const DIGEST_LEN: usize = 16;

/// SHA-256 hex digest of a tool call's arguments, truncated for display.
///
/// serde_json serialises object keys in sorted order, so semantically
/// equal argument objects digest identically.
pub fn args_digest(args: &serde_json::Value) -> String {
    let canonical = args.to_string();
    digest_str(&canonical)
}

/// Digest of a raw (possibly unparseable) argument string.
pub fn raw_digest(raw: &str) -> String {
    digest_str(raw)
}

fn digest_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let full = hex::encode(hasher.finalize());
    full[..DIGEST_LEN].to_string()
}
