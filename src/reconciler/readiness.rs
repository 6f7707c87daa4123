//! kstatus-style readiness computation: a small pure function per
//! GVK with a registry fallback, used to classify every object the
//! plan touched as healthy or not for `status.nonReadyStatus[]` and
//! `resourceCounts`.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    InProgress,
    Failed,
    Current,
    Terminating,
    Unknown,
}

impl Readiness {
    pub fn summary(self) -> &'static str {
        match self {
            Readiness::InProgress => "waiting for rollout to finish",
            Readiness::Failed => "resource reported a failure",
            Readiness::Current => "healthy",
            Readiness::Terminating => "terminating",
            Readiness::Unknown => "readiness unknown for this kind",
        }
    }
}

/// Computes readiness for `obj` (a full object JSON value, as built by
/// the plan builder), dispatching on `kind`. Kinds without a specific
/// rule fall back to the generic `status.conditions[type=Ready]` check,
/// and finally to `Unknown` if even that is absent.
pub fn compute(kind: &str, obj: &Value) -> Readiness {
    if obj.pointer("/metadata/deletionTimestamp").is_some() {
        return Readiness::Terminating;
    }

    match kind {
        "Deployment" | "StatefulSet" | "ReplicaSet" => compute_rollout(obj),
        "DaemonSet" => compute_daemonset(obj),
        "Job" => compute_job(obj),
        "Pod" => compute_pod(obj),
        _ => compute_generic_conditions(obj),
    }
}

fn compute_rollout(obj: &Value) -> Readiness {
    let spec_replicas = obj.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
    let ready = obj.pointer("/status/readyReplicas").and_then(Value::as_i64).unwrap_or(0);
    let updated = obj.pointer("/status/updatedReplicas").and_then(Value::as_i64).unwrap_or(0);

    if ready >= spec_replicas && updated >= spec_replicas {
        Readiness::Current
    } else {
        Readiness::InProgress
    }
}

fn compute_daemonset(obj: &Value) -> Readiness {
    let desired = obj.pointer("/status/desiredNumberScheduled").and_then(Value::as_i64).unwrap_or(0);
    let ready = obj.pointer("/status/numberReady").and_then(Value::as_i64).unwrap_or(0);
    if ready >= desired {
        Readiness::Current
    } else {
        Readiness::InProgress
    }
}

fn compute_job(obj: &Value) -> Readiness {
    let failed = obj.pointer("/status/failed").and_then(Value::as_i64).unwrap_or(0);
    let succeeded = obj.pointer("/status/succeeded").and_then(Value::as_i64).unwrap_or(0);
    if failed > 0 {
        Readiness::Failed
    } else if succeeded > 0 {
        Readiness::Current
    } else {
        Readiness::InProgress
    }
}

fn compute_pod(obj: &Value) -> Readiness {
    match obj.pointer("/status/phase").and_then(Value::as_str) {
        Some("Running") | Some("Succeeded") => Readiness::Current,
        Some("Failed") => Readiness::Failed,
        Some("Pending") => Readiness::InProgress,
        _ => Readiness::Unknown,
    }
}

fn compute_generic_conditions(obj: &Value) -> Readiness {
    let Some(conditions) = obj.pointer("/status/conditions").and_then(Value::as_array) else {
        return Readiness::Unknown;
    };

    for condition in conditions {
        if condition.get("type").and_then(Value::as_str) == Some("Ready") {
            return match condition.get("status").and_then(Value::as_str) {
                Some("True") => Readiness::Current,
                Some("False") => Readiness::InProgress,
                _ => Readiness::Unknown,
            };
        }
    }
    Readiness::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_with_all_replicas_ready_is_current() {
        let obj = serde_json::json!({
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 3, "updatedReplicas": 3}
        });
        assert_eq!(compute("Deployment", &obj), Readiness::Current);
    }

    #[test]
    fn deployment_mid_rollout_is_in_progress() {
        let obj = serde_json::json!({
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 1, "updatedReplicas": 1}
        });
        assert_eq!(compute("Deployment", &obj), Readiness::InProgress);
    }

    #[test]
    fn object_with_deletion_timestamp_is_terminating() {
        let obj = serde_json::json!({"metadata": {"deletionTimestamp": "2024-01-01T00:00:00Z"}});
        assert_eq!(compute("ConfigMap", &obj), Readiness::Terminating);
    }

    #[test]
    fn unknown_kind_without_conditions_is_unknown() {
        let obj = serde_json::json!({});
        assert_eq!(compute("ConfigMap", &obj), Readiness::Unknown);
    }

    #[test]
    fn generic_ready_condition_true_is_current() {
        let obj = serde_json::json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        assert_eq!(compute("Widget", &obj), Readiness::Current);
    }
}
