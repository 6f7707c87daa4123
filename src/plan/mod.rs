//! C6 — Plan Builder: classifies objects into Create/Update/Delete
//! with normalization-aware suppression.

mod ignore;
mod mergepatch;
mod nullfield;
mod replicas;

pub use ignore::{is_ignored, name_matches};
pub use replicas::HpaTarget;

use indexmap::IndexMap;
use serde_json::Value;

use crate::crd::DeploymentOptions;
use crate::diff;
use crate::normalize::{NormalizeContext, NormalizerPipeline};
use crate::objectset::{ObjectKey, ObjectSet};

/// `{Create, Update, Delete, Objects}` for one reconcile's dry run.
#[derive(Debug, Default)]
pub struct Plan {
    pub create: Vec<ObjectKey>,
    pub update: IndexMap<ObjectKey, Value>,
    pub delete: Vec<ObjectKey>,
    pub objects: IndexMap<ObjectKey, Value>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

fn object_value(obj: &kube::api::DynamicObject) -> Value {
    serde_json::to_value(obj).unwrap_or(Value::Null)
}

/// Computes the dry-run plan for `desired` against `live`.
pub fn dry_run(
    desired: &ObjectSet,
    live: &ObjectSet,
    hpas: &[HpaTarget],
    options: &DeploymentOptions,
    default_namespace: &str,
) -> Plan {
    let pipeline = NormalizerPipeline::default_for(options);
    let mut plan = Plan::default();

    let mut desired_index: IndexMap<ObjectKey, (ObjectKey, &kube::api::DynamicObject)> = IndexMap::new();
    for (_, bucket) in desired.objects_by_gvk() {
        for (key, obj) in bucket {
            desired_index.insert(key.with_default_namespace(default_namespace), (key.clone(), obj));
        }
    }

    let mut live_index: IndexMap<ObjectKey, (ObjectKey, &kube::api::DynamicObject)> = IndexMap::new();
    for (_, bucket) in live.objects_by_gvk() {
        for (key, obj) in bucket {
            live_index.insert(key.with_default_namespace(default_namespace), (key.clone(), obj));
        }
    }

    // Create: desired, not live. Filtered by ignore-op rules.
    for (norm_key, (key, _)) in &desired_index {
        if live_index.contains_key(norm_key) {
            continue;
        }
        if is_ignored(&options.diff.compare_patches, key) {
            continue;
        }
        plan.create.push(key.clone());
    }

    // Delete: live, not desired.
    for (norm_key, (key, obj)) in &live_index {
        if desired_index.contains_key(norm_key) {
            continue;
        }
        plan.delete.push(key.clone());
        plan.objects.insert(key.clone(), object_value(obj));
    }

    // Update candidates: present in both.
    for (norm_key, (desired_key, desired_obj)) in &desired_index {
        let Some((live_key, live_obj)) = live_index.get(norm_key) else {
            continue;
        };

        let desired_value = object_value(desired_obj);
        let live_value = object_value(live_obj);
        let last_applied = diff::read_last_applied(&live_value);

        let ctx = NormalizeContext {
            group: desired_key.group.clone(),
            kind: desired_key.kind.clone(),
            namespace: desired_key.namespace.clone().unwrap_or_default(),
            name: desired_key.name.clone(),
            options,
        };

        let result = diff::three_way_diff(&desired_value, &live_value, last_applied.as_ref(), &pipeline, &ctx);
        plan.objects.insert(live_key.clone(), live_value.clone());

        if !result.modified {
            continue;
        }

        let Some(mut patch) = mergepatch::diff(&result.normalized_live, &result.predicted_live) else {
            continue;
        };

        let is_scalable = ctx.kind == "Deployment" || ctx.kind == "StatefulSet";
        if is_scalable {
            let api_version = format!("{}/v1", if ctx.group.is_empty() { "apps".to_string() } else { ctx.group.clone() });
            let governed = replicas::find_governing_hpa(
                hpas,
                &ctx.namespace,
                &api_version,
                &ctx.kind,
                &ctx.name,
            )
            .is_some();
            if governed && replicas::strip_replicas_and_check_empty(&mut patch) {
                continue;
            }
        }

        nullfield::strip_nulls(&mut patch);
        if nullfield::is_empty_after_strip(&patch) {
            continue;
        }

        plan.update.insert(live_key.clone(), patch);
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::{ApiResource, DynamicObject, GroupVersionKind};

    fn object(kind: &str, name: &str, ns: &str, spec: Value) -> (GroupVersionKind, DynamicObject) {
        let gvk = GroupVersionKind {
            group: if kind == "Deployment" { "apps".into() } else { "".into() },
            version: "v1".into(),
            kind: kind.into(),
        };
        let ar = ApiResource::from_gvk(&gvk);
        let mut obj = DynamicObject::new(name, &ar);
        obj.metadata.namespace = Some(ns.to_string());
        obj.data = spec;
        (gvk, obj)
    }

    #[test]
    fn empty_plan_when_in_sync() {
        let (gvk, obj) = object("ConfigMap", "cm", "ns", serde_json::json!({"data": {"a": "1"}}));
        let mut desired = ObjectSet::new();
        desired.add(gvk.clone(), obj.clone());
        let mut live = ObjectSet::new();
        live.add(gvk, obj);

        let options = DeploymentOptions::default();
        let plan = dry_run(&desired, &live, &[], &options, "default");
        assert!(plan.is_empty());
    }

    #[test]
    fn missing_live_object_is_a_create() {
        let (gvk, obj) = object("ConfigMap", "cm", "ns", serde_json::json!({"data": {}}));
        let mut desired = ObjectSet::new();
        desired.add(gvk, obj);
        let live = ObjectSet::new();

        let options = DeploymentOptions::default();
        let plan = dry_run(&desired, &live, &[], &options, "default");
        assert_eq!(plan.create.len(), 1);
        assert!(plan.update.is_empty());
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn orphaned_live_object_is_a_delete() {
        let (gvk, obj) = object("ConfigMap", "cm", "ns", serde_json::json!({"data": {}}));
        let desired = ObjectSet::new();
        let mut live = ObjectSet::new();
        live.add(gvk, obj);

        let options = DeploymentOptions::default();
        let plan = dry_run(&desired, &live, &[], &options, "default");
        assert_eq!(plan.delete.len(), 1);
    }

    #[test]
    fn replicas_drift_under_hpa_is_suppressed() {
        let (gvk, desired_obj) = object(
            "Deployment",
            "web",
            "ns",
            serde_json::json!({"spec": {"replicas": 1}}),
        );
        let (_, live_obj) = object(
            "Deployment",
            "web",
            "ns",
            serde_json::json!({"spec": {"replicas": 3}}),
        );

        let mut desired = ObjectSet::new();
        desired.add(gvk.clone(), desired_obj);
        let mut live = ObjectSet::new();
        live.add(gvk, live_obj);

        let hpas = vec![HpaTarget {
            namespace: "ns".into(),
            target_api_version: "apps/v1".into(),
            target_kind: "Deployment".into(),
            target_name: "web".into(),
            min_replicas: 2,
            max_replicas: 5,
            live_replicas: 3,
        }];

        let options = DeploymentOptions::default();
        let plan = dry_run(&desired, &live, &hpas, &options, "default");
        assert!(plan.update.is_empty(), "expected replicas drift to be suppressed");
    }

    #[test]
    fn ignore_op_by_name_regex_excludes_create() {
        use crate::crd::{ComparePatch, DiffOptions, PatchOp, PatchOperationSpec};

        let (gvk, obj) = object("ConfigMap", "foo-test", "ns", serde_json::json!({}));
        let mut desired = ObjectSet::new();
        desired.add(gvk.clone(), obj);
        let (gvk2, obj2) = object("ConfigMap", "foo", "ns", serde_json::json!({}));
        desired.add(gvk2, obj2);
        let live = ObjectSet::new();

        let options = DeploymentOptions {
            diff: DiffOptions {
                compare_patches: vec![ComparePatch {
                    api_version: "v1".into(),
                    kind: "ConfigMap".into(),
                    namespace: String::new(),
                    name: ".*-test".into(),
                    json_pointers: vec![],
                    operations: vec![PatchOperationSpec {
                        op: PatchOp::Ignore,
                        path: String::new(),
                        value: Value::Null,
                    }],
                }],
            },
            ..Default::default()
        };

        let plan = dry_run(&desired, &live, &[], &options, "default");
        let names: Vec<_> = plan.create.iter().map(|k| k.name.clone()).collect();
        assert!(names.contains(&"foo".to_string()));
        assert!(!names.contains(&"foo-test".to_string()));
    }
}
