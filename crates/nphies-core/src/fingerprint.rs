//! Stable message fingerprints for reconciliation idempotence.
//!
//! `sha256(resource_type ":" response_identifier ":" content_hash)` where the
//! content hash covers the payload with `meta` removed and object keys
//! sorted, so a re-polled copy of the same message hashes identically.

use serde_json::Value;
use sha2::{Digest, Sha256};

pub fn fingerprint(
    resource_type: &str,
    response_identifier: Option<&str>,
    payload: &Value,
) -> String {
    let content = content_hash(payload);
    let composite = format!(
        "{resource_type}:{}:{content}",
        response_identifier.unwrap_or_default()
    );
    hash_string(&composite)
}

/// Hash of the business content, ignoring transport metadata.
pub fn content_hash(payload: &Value) -> String {
    let mut stripped = payload.clone();
    if let Value::Object(map) = &mut stripped {
        map.remove("meta");
    }
    hash_string(&canonical(&stripped).to_string())
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted: serde_json::Map<String, Value> = keys
                .into_iter()
                .map(|k| (k.clone(), canonical(&map[k])))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

fn hash_string(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("{digest:x}")
}
