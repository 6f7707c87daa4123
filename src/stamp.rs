//! C2 — Label/Annotation Stamper: tags every rendered object with the
//! bundle-identity set-id, merging ownership labels/annotations onto
//! each object's own labels/annotations on top of whatever the chart
//! already set.

use kube::api::DynamicObject;
use sha2::{Digest, Sha256};

pub const LABEL_BUNDLE_ID: &str = "fleet.cattle.io/bundle-id";
pub const LABEL_MANAGED: &str = "fleet.cattle.io/managed";
pub const LABEL_SET_ID_HASH: &str = "objectset.rio.cattle.io/hash";
pub const LABEL_OWNER_NAME: &str = "objectset.rio.cattle.io/owner-name";
pub const LABEL_OWNER_NAMESPACE: &str = "objectset.rio.cattle.io/owner-namespace";
pub const ANNOTATION_SET_ID: &str = "objectset.rio.cattle.io/id";
pub const ANNOTATION_HELM_RESOURCE_POLICY: &str = "helm.sh/resource-policy";

/// The owner coordinates a set-id is computed from.
#[derive(Debug, Clone)]
pub struct SetIdentity {
    pub bundle_id: String,
    pub label_prefix: String,
    pub label_suffix: String,
    pub owner_name: String,
    pub owner_namespace: String,
}

impl SetIdentity {
    /// `S = f(bundleID, labelPrefix, labelSuffix)`, the human-readable
    /// set-id string stamped as an annotation.
    pub fn set_id_string(&self) -> String {
        format!(
            "{}{}{}",
            self.label_prefix, self.bundle_id, self.label_suffix
        )
    }

    /// sha256(S) truncated to 48 hex chars.
    pub fn set_id_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.set_id_string().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest.chars().take(48).collect()
    }
}

/// Merges the ownership labels/annotations onto `obj`. Caller-provided
/// labels/annotations win on conflict *except* for the ownership keys
/// themselves, which are always authoritative.
pub fn stamp(obj: &mut DynamicObject, identity: &SetIdentity) {
    let labels = obj.metadata.labels.get_or_insert_with(Default::default);
    labels.insert(LABEL_BUNDLE_ID.to_string(), identity.bundle_id.clone());
    labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
    labels.insert(LABEL_SET_ID_HASH.to_string(), identity.set_id_hash());
    labels.insert(
        LABEL_OWNER_NAME.to_string(),
        identity.owner_name.clone(),
    );
    labels.insert(
        LABEL_OWNER_NAMESPACE.to_string(),
        identity.owner_namespace.clone(),
    );

    let annotations = obj
        .metadata
        .annotations
        .get_or_insert_with(Default::default);
    annotations.insert(ANNOTATION_SET_ID.to_string(), identity.set_id_string());
}

/// Annotates a CustomResourceDefinition with the Helm keep-policy
/// annotation so uninstall leaves CRDs behind.
pub fn annotate_crd_retain(obj: &mut DynamicObject) {
    let annotations = obj
        .metadata
        .annotations
        .get_or_insert_with(Default::default);
    annotations.insert(ANNOTATION_HELM_RESOURCE_POLICY.to_string(), "keep".to_string());
}

/// Label selector string selecting every object owned by `bundle_id`,
/// used by the plan builder (C6) to enumerate live owned objects.
pub fn owned_label_selector(bundle_id: &str) -> String {
    format!("{LABEL_BUNDLE_ID}={bundle_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ApiResource;
    use kube::api::GroupVersionKind;

    fn identity() -> SetIdentity {
        SetIdentity {
            bundle_id: "fleet-default/my-bundle".into(),
            label_prefix: "fleet-agent-".into(),
            label_suffix: "".into(),
            owner_name: "my-bundle".into(),
            owner_namespace: "fleet-default".into(),
        }
    }

    #[test]
    fn set_id_hash_is_48_hex_chars() {
        let id = identity();
        let hash = id.set_id_hash();
        assert_eq!(hash.len(), 48);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn caller_labels_survive_except_ownership_keys() {
        let gvk = GroupVersionKind {
            group: "".into(),
            version: "v1".into(),
            kind: "ConfigMap".into(),
        };
        let ar = ApiResource::from_gvk(&gvk);
        let mut obj = DynamicObject::new("cm", &ar);
        obj.metadata.labels = Some(
            [
                ("app".to_string(), "myapp".to_string()),
                (LABEL_BUNDLE_ID.to_string(), "someone-else".to_string()),
            ]
            .into_iter()
            .collect(),
        );

        let id = identity();
        stamp(&mut obj, &id);

        let labels = obj.metadata.labels.unwrap();
        assert_eq!(labels.get("app").unwrap(), "myapp");
        assert_eq!(labels.get(LABEL_BUNDLE_ID).unwrap(), &id.bundle_id);
    }
}
