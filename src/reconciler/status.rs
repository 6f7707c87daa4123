//! Builds `status.{modifiedStatus, nonReadyStatus, resourceCounts,
//! display}` from a `Plan` and per-object readiness.

use crate::crd::{DisplayStatus, ModifiedStatus, NonReadyStatus, ResourceCounts};
use crate::plan::Plan;

use super::readiness::{self, Readiness};

/// Builds `status.modifiedStatus[]` from the non-empty plan: every
/// create/update/delete entry becomes one modified-status row.
pub fn modified_status(plan: &Plan) -> Vec<ModifiedStatus> {
    let mut rows = Vec::new();

    for key in &plan.create {
        rows.push(ModifiedStatus {
            kind: key.kind.clone(),
            api_version: api_version(&key.group, &key.version),
            namespace: key.namespace.clone().unwrap_or_default(),
            name: key.name.clone(),
            create: true,
            delete: false,
            patch: String::new(),
        });
    }

    for (key, patch) in &plan.update {
        rows.push(ModifiedStatus {
            kind: key.kind.clone(),
            api_version: api_version(&key.group, &key.version),
            namespace: key.namespace.clone().unwrap_or_default(),
            name: key.name.clone(),
            create: false,
            delete: false,
            patch: patch.to_string(),
        });
    }

    for key in &plan.delete {
        rows.push(ModifiedStatus {
            kind: key.kind.clone(),
            api_version: api_version(&key.group, &key.version),
            namespace: key.namespace.clone().unwrap_or_default(),
            name: key.name.clone(),
            create: false,
            delete: true,
            patch: String::new(),
        });
    }

    rows
}

/// Builds `status.nonReadyStatus[]` and `resourceCounts` by running
/// kstatus readiness over every live object the plan touched.
pub fn readiness_status(plan: &Plan) -> (Vec<NonReadyStatus>, ResourceCounts) {
    let mut non_ready = Vec::new();
    let mut counts = ResourceCounts::default();

    for (key, obj) in &plan.objects {
        match readiness::compute(&key.kind, obj) {
            Readiness::Current => counts.ready += 1,
            Readiness::InProgress => {
                counts.not_ready += 1;
                non_ready.push(NonReadyStatus {
                    kind: key.kind.clone(),
                    api_version: api_version(&key.group, &key.version),
                    namespace: key.namespace.clone().unwrap_or_default(),
                    name: key.name.clone(),
                    summary: Readiness::InProgress.summary().to_string(),
                });
            }
            Readiness::Failed => {
                counts.not_ready += 1;
                non_ready.push(NonReadyStatus {
                    kind: key.kind.clone(),
                    api_version: api_version(&key.group, &key.version),
                    namespace: key.namespace.clone().unwrap_or_default(),
                    name: key.name.clone(),
                    summary: Readiness::Failed.summary().to_string(),
                });
            }
            Readiness::Terminating => counts.wait_applied += 1,
            Readiness::Unknown => counts.unknown += 1,
        }
        counts.desired_ready += 1;
    }

    for key in &plan.create {
        counts.missing += 1;
        let _ = key;
    }
    for key in &plan.delete {
        counts.orphaned += 1;
        let _ = key;
    }
    counts.modified = plan.update.len() as u32;

    (non_ready, counts)
}

/// Builds `status.display` summarizing overall state for the UI.
pub fn display(ready: bool, plan_empty: bool, rollback_failed_message: Option<&str>) -> DisplayStatus {
    if let Some(message) = rollback_failed_message {
        return DisplayStatus { state: "Modified".to_string(), message: message.to_string() };
    }
    if ready && plan_empty {
        DisplayStatus { state: "Ready".to_string(), message: String::new() }
    } else if !plan_empty {
        DisplayStatus { state: "Modified".to_string(), message: "drift detected".to_string() }
    } else {
        DisplayStatus { state: "NotReady".to_string(), message: "waiting for resources to become ready".to_string() }
    }
}

fn api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectset::ObjectKey;

    fn key(kind: &str, name: &str) -> ObjectKey {
        ObjectKey {
            group: "".into(),
            version: "v1".into(),
            kind: kind.into(),
            namespace: Some("ns".into()),
            name: name.into(),
        }
    }

    #[test]
    fn modified_status_rows_reflect_create_update_delete() {
        let mut plan = Plan::default();
        plan.create.push(key("ConfigMap", "a"));
        plan.update.insert(key("ConfigMap", "b"), serde_json::json!({"data": {}}));
        plan.delete.push(key("ConfigMap", "c"));

        let rows = modified_status(&plan);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().any(|r| r.name == "a" && r.create));
        assert!(rows.iter().any(|r| r.name == "b" && !r.create && !r.delete));
        assert!(rows.iter().any(|r| r.name == "c" && r.delete));
    }

    #[test]
    fn readiness_status_counts_current_object_as_ready() {
        let mut plan = Plan::default();
        let k = key("Deployment", "web");
        plan.objects.insert(
            k,
            serde_json::json!({"spec": {"replicas": 1}, "status": {"readyReplicas": 1, "updatedReplicas": 1}}),
        );
        let (non_ready, counts) = readiness_status(&plan);
        assert!(non_ready.is_empty());
        assert_eq!(counts.ready, 1);
    }

    #[test]
    fn display_reports_modified_when_rollback_failed() {
        let status = display(false, false, Some("service.v1 ns/svc modified {}"));
        assert_eq!(status.state, "Modified");
        assert_eq!(status.message, "service.v1 ns/svc modified {}");
    }
}
