use serde_json::Value;

use super::{NormalizeContext, Normalizer};
use crate::crd::ComparePatch;
use crate::error::NormalizerError;

/// For objects matching `{group, kind, namespace, name}` in
/// `options.diff.comparePatches`, deletes the JSON pointers listed in
/// `jsonPointers` before the object is compared. Matching here is
/// exact-equality on namespace/name (the regex behavior documented in
/// belongs to the Create-filtering "ignore" op, a separate mechanism
/// — see `plan::ignore`).
pub struct IgnoreNormalizer {
    rules: Vec<ComparePatch>,
}

impl IgnoreNormalizer {
    pub fn new(rules: Vec<ComparePatch>) -> Self {
        Self { rules }
    }

    fn matches(&self, rule: &ComparePatch, ctx: &NormalizeContext) -> bool {
        if rule.kind != ctx.kind {
            return false;
        }
        if !rule.namespace.is_empty() && rule.namespace != ctx.namespace {
            return false;
        }
        if !rule.name.is_empty() && rule.name != ctx.name {
            return false;
        }
        true
    }
}

impl Normalizer for IgnoreNormalizer {
    fn name(&self) -> &'static str {
        "IgnoreNormalizer"
    }

    fn normalize(&self, obj: &mut Value, ctx: &NormalizeContext) -> Result<(), NormalizerError> {
        for rule in &self.rules {
            if !self.matches(rule, ctx) {
                continue;
            }
            for pointer in &rule.json_pointers {
                remove_pointer(obj, pointer).map_err(|message| NormalizerError::MalformedPointer {
                    pointer: pointer.clone(),
                    message,
                })?;
            }
        }
        Ok(())
    }
}

/// Deletes the value at `pointer` if present. A malformed pointer is a
/// `NormalizerError`, discarded per the pipeline's error policy rather
/// than aborting the whole normalize pass.
fn remove_pointer(obj: &mut Value, pointer: &str) -> Result<(), String> {
    if pointer.is_empty() || pointer == "/" {
        return Err("refusing to remove document root".to_string());
    }
    let (parent_pointer, key) = pointer
        .rsplit_once('/')
        .ok_or_else(|| format!("pointer must start with '/': {pointer}"))?;

    let parent = if parent_pointer.is_empty() {
        Some(&mut *obj)
    } else {
        obj.pointer_mut(parent_pointer)
    };

    let Some(parent) = parent else {
        // Parent missing means there's nothing to remove; not an error.
        return Ok(());
    };

    let key = key.replace("~1", "/").replace("~0", "~");
    match parent {
        Value::Object(map) => {
            map.remove(&key);
            Ok(())
        }
        Value::Array(arr) => {
            let idx: usize = key
                .parse()
                .map_err(|_| format!("non-numeric array index in pointer: {pointer}"))?;
            if idx < arr.len() {
                arr.remove(idx);
            }
            Ok(())
        }
        Value::Null => Ok(()),
        _ => Err(format!("pointer traverses a scalar: {pointer}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DeploymentOptions;

    #[test]
    fn removes_listed_pointers_on_match() {
        let options = DeploymentOptions::default();
        let ctx = NormalizeContext {
            group: "".into(),
            kind: "Service".into(),
            namespace: "drift".into(),
            name: "drift-dummy-service".into(),
            options: &options,
        };
        let normalizer = IgnoreNormalizer::new(vec![ComparePatch {
            api_version: "v1".into(),
            kind: "Service".into(),
            namespace: "drift".into(),
            name: "drift-dummy-service".into(),
            json_pointers: vec!["/spec/externalName".into()],
            operations: vec![],
        }]);

        let mut obj = serde_json::json!({"spec": {"externalName": "modified", "type": "ExternalName"}});
        normalizer.normalize(&mut obj, &ctx).unwrap();
        assert!(obj["spec"].get("externalName").is_none());
        assert_eq!(obj["spec"]["type"], "ExternalName");
    }

    #[test]
    fn non_matching_object_is_untouched() {
        let options = DeploymentOptions::default();
        let ctx = NormalizeContext {
            group: "".into(),
            kind: "Service".into(),
            namespace: "other".into(),
            name: "svc".into(),
            options: &options,
        };
        let normalizer = IgnoreNormalizer::new(vec![ComparePatch {
            api_version: "v1".into(),
            kind: "Service".into(),
            namespace: "drift".into(),
            name: "drift-dummy-service".into(),
            json_pointers: vec!["/spec/externalName".into()],
            operations: vec![],
        }]);
        let mut obj = serde_json::json!({"spec": {"externalName": "modified"}});
        normalizer.normalize(&mut obj, &ctx).unwrap();
        assert_eq!(obj["spec"]["externalName"], "modified");
    }
}
