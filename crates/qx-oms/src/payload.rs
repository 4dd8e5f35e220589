//! Canonical payload hashing for idempotent replay detection.
//!
//! Two submissions under one idempotency key are "the same order" iff the
//! economically meaningful fields match.  Metadata, timestamps, and the
//! strategy name are deliberately excluded: a replay after restart may
//! carry different bookkeeping but must still collapse onto the original
//! order.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use qx_schemas::OrderRequest;

/// SHA-256 over the canonical JSON of
/// `{symbol, side, order_type, qty, limit_price, stop_price}`.
pub fn payload_hash(request: &OrderRequest) -> String {
    let raw = json!({
        "symbol": request.symbol,
        "side": request.side,
        "order_type": request.order_type,
        "qty": request.qty,
        "limit_price": request.limit_price,
        "stop_price": request.stop_price,
    });
    let canonical =
        serde_json::to_string(&sort_keys(&raw)).expect("payload serialization is infallible");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
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
