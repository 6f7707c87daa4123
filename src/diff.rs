//! C5 — Three-Way Diff Engine: predicted-live vs normalized-live,
//! producing a merge patch.

use serde_json::Value;

use crate::normalize::{self, NormalizeContext, NormalizerPipeline};

pub const LAST_APPLIED_ANNOTATION: &str = "fleet.cattle.io/last-applied-configuration";

#[derive(Debug, Clone)]
pub struct DiffResult {
    pub modified: bool,
    pub normalized_live: Value,
    pub predicted_live: Value,
}

/// Computes the three-way diff between last-applied, live, and desired.
///
/// `desired` and `live` are full-object JSON values (apiVersion/kind/
/// metadata/spec/...). `last_applied` is the parsed contents of the
/// `last-applied-configuration` annotation on `live`, if present.
pub fn three_way_diff(
    desired: &Value,
    live: &Value,
    last_applied: Option<&Value>,
    pipeline: &NormalizerPipeline,
    ctx: &NormalizeContext,
) -> DiffResult {
    let empty = Value::Object(Default::default());
    let last_applied = last_applied.unwrap_or(&empty);

    let mut predicted_live = merge_three_way(live, last_applied, desired);
    let mut normalized_live = live.clone();

    pipeline.apply(&mut predicted_live, ctx);
    pipeline.apply(&mut normalized_live, ctx);

    normalize::strip_aggregated_rules(&ctx.kind, &mut predicted_live);
    normalize::strip_aggregated_rules(&ctx.kind, &mut normalized_live);

    let modified = predicted_live != normalized_live;

    DiffResult {
        modified,
        normalized_live,
        predicted_live,
    }
}

/// Reads the last-applied-configuration annotation, if present, and
/// parses it back into a `Value`.
pub fn read_last_applied(live: &Value) -> Option<Value> {
    let raw = live
        .pointer(&format!(
            "/metadata/annotations/{}",
            LAST_APPLIED_ANNOTATION.replace('/', "~1")
        ))?
        .as_str()?;
    serde_json::from_str(raw).ok()
}

/// Three-way merge: apply to `live` the delta between `last_applied`
/// and `desired`. When fields are absent from `last_applied` (no prior
/// apply on record), this degrades to a plain merge of `desired` onto
/// `live`, which is the fallback JSON-merge behavior used
/// step 2 for objects without a known strategic-merge schema.
fn merge_three_way(live: &Value, last_applied: &Value, desired: &Value) -> Value {
    let mut result = live.clone();
    apply_delta(&mut result, last_applied, desired);
    result
}

fn apply_delta(result: &mut Value, last_applied: &Value, desired: &Value) {
    match (last_applied, desired) {
        (Value::Object(last_map), Value::Object(desired_map)) => {
            let result_map = match result.as_object_mut() {
                Some(m) => m,
                None => {
                    *result = Value::Object(Default::default());
                    result.as_object_mut().unwrap()
                }
            };

            for (key, desired_value) in desired_map {
                let last_value = last_map.get(key).cloned().unwrap_or(Value::Null);
                let entry = result_map.entry(key.clone()).or_insert(Value::Null);
                apply_delta(entry, &last_value, desired_value);
            }

            // Fields present in last-applied but dropped from desired
            // are deletions: the field should disappear from the
            // predicted live object entirely.
            for key in last_map.keys() {
                if !desired_map.contains_key(key) {
                    result_map.remove(key);
                }
            }
        }
        _ => {
            *result = desired.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DeploymentOptions;

    fn ctx(options: &DeploymentOptions) -> NormalizeContext<'_> {
        NormalizeContext {
            group: "".into(),
            kind: "ConfigMap".into(),
            namespace: "ns".into(),
            name: "cm".into(),
            options,
        }
    }

    #[test]
    fn diff_is_reflexive() {
        let options = DeploymentOptions::default();
        let pipeline = NormalizerPipeline::default_for(&options);
        let obj = serde_json::json!({"data": {"foo": "bar"}});
        let result = three_way_diff(&obj, &obj, None, &pipeline, &ctx(&options));
        assert!(!result.modified);
    }

    #[test]
    fn detects_externally_modified_field() {
        let options = DeploymentOptions::default();
        let pipeline = NormalizerPipeline::default_for(&options);
        let desired = serde_json::json!({"data": {"foo": "bar"}});
        let last_applied = serde_json::json!({"data": {"foo": "bar"}});
        let live = serde_json::json!({"data": {"foo": "modified"}});
        let result = three_way_diff(&desired, &live, Some(&last_applied), &pipeline, &ctx(&options));
        assert!(result.modified);
    }

    #[test]
    fn status_never_counts_as_drift() {
        let options = DeploymentOptions::default();
        let pipeline = NormalizerPipeline::default_for(&options);
        let desired = serde_json::json!({"spec": {"replicas": 1}});
        let live = serde_json::json!({"spec": {"replicas": 1}, "status": {"readyReplicas": 1}});
        let ctx = NormalizeContext {
            group: "apps".into(),
            kind: "Deployment".into(),
            namespace: "ns".into(),
            name: "d".into(),
            options: &options,
        };
        let result = three_way_diff(&desired, &live, None, &pipeline, &ctx);
        assert!(!result.modified);
    }
}
