//! Null-field normalization: Helm v4 emits explicit nulls for omitted
//! fields where the API server has already applied defaults.
//! Recursively strips those so they don't register as spurious update
//! drift. Idempotent, per the tests below.

use serde_json::Value;

/// Recursively strips keys whose value is `null` from a merge patch.
/// Non-map leaf values pass through untouched.
pub fn strip_nulls(patch: &mut Value) {
    if let Some(map) = patch.as_object_mut() {
        let keys_to_remove: Vec<String> = map
            .iter()
            .filter(|(_, v)| v.is_null())
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys_to_remove {
            map.remove(&key);
        }
        for value in map.values_mut() {
            strip_nulls(value);
        }
    }
}

/// `true` if, after stripping nulls, the patch has no remaining keys.
pub fn is_empty_after_strip(patch: &Value) -> bool {
    let mut copy = patch.clone();
    strip_nulls(&mut copy);
    copy.as_object().is_none_or(|m| m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_top_level_and_nested_nulls() {
        let mut patch = serde_json::json!({
            "spec": {"replicas": Value::Null, "paused": false},
            "dropped": Value::Null
        });
        strip_nulls(&mut patch);
        assert!(patch.get("dropped").is_none());
        assert!(patch["spec"].get("replicas").is_none());
        assert_eq!(patch["spec"]["paused"], false);
    }

    #[test]
    fn all_null_patch_is_suppressed() {
        let patch = serde_json::json!({"spec": {"replicas": Value::Null}});
        assert!(is_empty_after_strip(&patch));
    }

    #[test]
    fn non_map_leaf_passes_through() {
        let mut patch = serde_json::json!(["a", "b", Value::Null]);
        let before = patch.clone();
        strip_nulls(&mut patch);
        assert_eq!(patch, before);
    }

    #[test]
    fn strip_nulls_is_idempotent() {
        let mut patch = serde_json::json!({
            "spec": {"replicas": Value::Null, "paused": false},
        });
        strip_nulls(&mut patch);
        let once = patch.clone();
        strip_nulls(&mut patch);
        assert_eq!(patch, once);
    }
}
