//! Produces an RFC-7396 JSON Merge Patch transforming `from` into `to`.
//! `json_patch` only speaks RFC-6902 JSON Patch, so the merge-patch
//! shape the plan builder needs is hand-rolled here.

use serde_json::{Map, Value};

/// Returns `None` when `from == to` (no patch needed), otherwise the
/// merge patch document.
pub fn diff(from: &Value, to: &Value) -> Option<Value> {
    match (from, to) {
        (Value::Object(from_map), Value::Object(to_map)) => {
            let mut patch = Map::new();
            for (key, to_value) in to_map {
                match from_map.get(key) {
                    Some(from_value) if from_value == to_value => {}
                    Some(from_value) => {
                        if let Some(nested) = diff(from_value, to_value) {
                            patch.insert(key.clone(), nested);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), to_value.clone());
                    }
                }
            }
            for key in from_map.keys() {
                if !to_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        _ if from == to => None,
        _ => Some(to.clone()),
    }
}
