//! Deterministic canonicalization and fingerprinting (§4.4, §9 open question b).
//!
//! Canonical form: object keys sorted lexicographically by code point, array
//! order preserved, numbers re-serialized through `serde_json`'s own
//! shortest round-trip `Number` formatting, booleans/nulls preserved as-is.
//! Hashing is SHA-256 over the canonical UTF-8 bytes, hex-encoded lowercase —
//! the same crate and encoding the teacher uses for `WorkUnitManifest` and
//! `STATE_COMMIT` hashing.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Recursively sort object keys; arrays and scalars are returned unchanged
/// apart from recursing into their elements.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serialize a value's canonical form to bytes. Because `serde_json::Map`
/// (used above) is a `BTreeMap`-style ordered map when sorted manually and
/// `serde_json` serializes object entries in insertion order, sorting keys
/// before serializing is sufficient to get a deterministic byte stream.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&canonicalize(value)).expect("canonical value always serializes")
}

/// `H(stageId ‖ canonical(payload) ‖ sorted(parent fingerprints))`, hex.
pub fn fingerprint(
    stage_id: &str,
    payload: &Value,
    parent_fingerprints: &std::collections::BTreeMap<String, String>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stage_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_bytes(payload));
    hasher.update(b"\0");
    for (parent_id, fp) in parent_fingerprints {
        hasher.update(parent_id.as_bytes());
        hasher.update(b":");
        hasher.update(fp.as_bytes());
        hasher.update(b";");
    }
    format!("{:x}", hasher.finalize())
}
