//! Replicas normalization: suppresses spurious `spec.replicas` drift on
//! Deployments/StatefulSets that are under active HPA management.

use serde_json::Value;

/// A live HorizontalPodAutoscaler's relevant fields, collected by the
/// caller from both `autoscaling/v1` and `autoscaling/v2` objects in
/// the same namespace.
#[derive(Debug, Clone)]
pub struct HpaTarget {
    pub namespace: String,
    pub target_api_version: String,
    pub target_kind: String,
    pub target_name: String,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub live_replicas: i32,
}

/// Finds an HPA targeting `(api_version, kind, name)` in `namespace`
/// whose live replica count is currently within `[min, max]`.
pub fn find_governing_hpa<'a>(
    hpas: &'a [HpaTarget],
    namespace: &str,
    api_version: &str,
    kind: &str,
    name: &str,
) -> Option<&'a HpaTarget> {
    hpas.iter().find(|hpa| {
        hpa.namespace == namespace
            && hpa.target_api_version == api_version
            && hpa.target_kind == kind
            && hpa.target_name == name
            && hpa.live_replicas >= hpa.min_replicas
            && hpa.live_replicas <= hpa.max_replicas
    })
}

/// Deletes `spec.replicas` from a merge patch when the object is under
/// HPA management. Returns `true` if, after stripping, the patch has
/// no remaining top-level keys (or an empty `spec`) and the update
/// should be suppressed entirely.
pub fn strip_replicas_and_check_empty(patch: &mut Value) -> bool {
    if let Some(spec) = patch.get_mut("spec").and_then(Value::as_object_mut) {
        spec.remove("replicas");
        if spec.is_empty() {
            if let Some(map) = patch.as_object_mut() {
                map.remove("spec");
            }
        }
    }

    patch
        .as_object()
        .is_none_or(|map| map.is_empty())
}
