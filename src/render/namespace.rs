//! Target-namespace enforcement and the `defaultNamespace` fallback
//! used for objects whose manifest left namespace unset.

use kube::api::DynamicObject;

use crate::crd::DeploymentOptions;
use crate::error::RenderError;

/// Kinds that are cluster-scoped in a stock Kubernetes API server. Not
/// exhaustive for every possible CRD, but covers every builtin kind a
/// bundle would plausibly ship, matching the builtin-type registry
/// approach used elsewhere in this renderer (C4's `KnownTypesNormalizer`).
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "StorageClass",
    "PriorityClass",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
    "APIService",
    "CertificateSigningRequest",
    "VolumeAttachment",
];

fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

pub fn enforce_target_namespace(
    objects: &mut [DynamicObject],
    options: &DeploymentOptions,
) -> Result<(), RenderError> {
    if let Some(target) = &options.target_namespace {
        for obj in objects.iter_mut() {
            let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
            if is_cluster_scoped(kind) {
                return Err(RenderError::ClusterScopedUnderTargetNamespace {
                    kind: kind.to_string(),
                    name: obj.metadata.name.clone().unwrap_or_default(),
                });
            }
            obj.metadata.namespace = Some(target.clone());
        }
        return Ok(());
    }

    if let Some(default_ns) = &options.default_namespace {
        for obj in objects.iter_mut() {
            let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
            if is_cluster_scoped(kind) {
                continue;
            }
            if obj.metadata.namespace.is_none() {
                obj.metadata.namespace = Some(default_ns.clone());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::{ApiResource, GroupVersionKind, TypeMeta};

    fn obj(kind: &str, name: &str) -> DynamicObject {
        let gvk = GroupVersionKind { group: "".into(), version: "v1".into(), kind: kind.into() };
        let ar = ApiResource::from_gvk(&gvk);
        let mut o = DynamicObject::new(name, &ar);
        o.types = Some(TypeMeta { api_version: ar.api_version, kind: ar.kind });
        o
    }

    #[test]
    fn cluster_scoped_under_target_namespace_is_hard_error() {
        let mut objects = vec![obj("ClusterRole", "cr")];
        let options = DeploymentOptions {
            target_namespace: Some("ns1".into()),
            ..Default::default()
        };
        let err = enforce_target_namespace(&mut objects, &options).unwrap_err();
        assert!(matches!(
            err,
            RenderError::ClusterScopedUnderTargetNamespace { .. }
        ));
    }

    #[test]
    fn namespaced_resources_get_overwritten() {
        let mut objects = vec![obj("ConfigMap", "cm")];
        objects[0].metadata.namespace = Some("old".into());
        let options = DeploymentOptions {
            target_namespace: Some("ns1".into()),
            ..Default::default()
        };
        enforce_target_namespace(&mut objects, &options).unwrap();
        assert_eq!(objects[0].metadata.namespace.as_deref(), Some("ns1"));
    }

    #[test]
    fn default_namespace_only_fills_gaps() {
        let mut objects = vec![obj("ConfigMap", "cm")];
        let options = DeploymentOptions {
            default_namespace: Some("fallback".into()),
            ..Default::default()
        };
        enforce_target_namespace(&mut objects, &options).unwrap();
        assert_eq!(objects[0].metadata.namespace.as_deref(), Some("fallback"));
    }
}
