//! Tolerant JSON extraction from model output.
//!
//! Stages that expect structured output but cannot force it use this to
//! find the first top-level JSON object or array in a string, ignoring any
//! prose around it. Bracket matching is string- and escape-aware.

use serde_json::Value;

/// Find and parse the first top-level JSON object or array in `text`.
///
/// Returns `None` when no balanced candidate parses; the caller falls back
/// to its declared default and records a parse issue.
pub fn extract_first_json(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(open_rel) = text[start..].find(['{', '[']) {
        let open = start + open_rel;
        if let Some(end) = find_balanced_end(bytes, open) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[open..=end]) {
                return Some(value);
            }
            // Balanced but unparseable; look for the next candidate.
            start = open + 1;
        } else {
            // Never closed; nothing after this can be complete either.
            return None;
        }
    }
    None
}

/// Return the index of the bracket closing the one at `open`, skipping
/// string literals and escapes.
fn find_balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let (open_ch, close_ch) = match bytes[open] {
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b if b == open_ch => depth += 1,
            b if b == close_ch => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract a JSON array of strings, the shape `reflect_topics` expects.
pub fn extract_string_array(text: &str) -> Option<Vec<String>> {
    match extract_first_json(text)? {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s),
                    _ => return None,
                }
            }
            Some(out)
        }
        _ => None,
    }
}
