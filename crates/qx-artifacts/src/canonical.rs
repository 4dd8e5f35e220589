//! Canonical JSON encoding for hashable artifacts.
//!
//! One event == one compact JSON line with recursively sorted object
//! keys.  Timestamps were truncated to microseconds at ingest and decimal
//! amounts serialize as fixed six-decimal strings, so the byte stream —
//! and therefore the hash — is identical across runs and hosts.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

/// Serialize to a single canonical JSON line (no trailing newline).
pub fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize artifact event failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
