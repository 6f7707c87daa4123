use k8s_openapi::api::core::v1::PodSpec;
use serde_json::Value;

use super::{NormalizeContext, Normalizer};
use crate::error::NormalizerError;

/// A builtin Kubernetes Rust type a CRD field can be re-marshaled
/// through, so differences in field order or CRD-side defaulting don't
/// register as drift against the canonical Kubernetes shape.
#[derive(Debug, Clone, Copy)]
pub enum BuiltinType {
    PodSpec,
}

impl BuiltinType {
    fn roundtrip(self, value: Value) -> Result<Value, String> {
        match self {
            BuiltinType::PodSpec => {
                let typed: PodSpec = serde_json::from_value(value).map_err(|e| e.to_string())?;
                serde_json::to_value(typed).map_err(|e| e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    group: String,
    kind: String,
    field_path: Vec<String>,
    builtin: BuiltinType,
}

/// `GroupKind -> [fieldPath, builtinType]` registry. Re-marshals the
/// field through the builtin type so CRD representations match the
/// canonical Kubernetes shape.
pub struct KnownTypesNormalizer {
    entries: Vec<RegistryEntry>,
}

impl Default for KnownTypesNormalizer {
    fn default() -> Self {
        Self {
            entries: vec![RegistryEntry {
                group: "argoproj.io".into(),
                kind: "Rollout".into(),
                field_path: vec!["spec".into(), "template".into(), "spec".into()],
                builtin: BuiltinType::PodSpec,
            }],
        }
    }
}

impl KnownTypesNormalizer {
    pub fn register(&mut self, group: &str, kind: &str, field_path: &[&str], builtin: BuiltinType) {
        self.entries.push(RegistryEntry {
            group: group.to_string(),
            kind: kind.to_string(),
            field_path: field_path.iter().map(|s| s.to_string()).collect(),
            builtin,
        });
    }
}

impl Normalizer for KnownTypesNormalizer {
    fn name(&self) -> &'static str {
        "KnownTypesNormalizer"
    }

    fn normalize(&self, obj: &mut Value, ctx: &NormalizeContext) -> Result<(), NormalizerError> {
        for entry in &self.entries {
            if entry.group != ctx.group || entry.kind != ctx.kind {
                continue;
            }

            let pointer = format!("/{}", entry.field_path.join("/"));
            let Some(field) = obj.pointer(&pointer).cloned() else {
                continue;
            };

            match entry.builtin.roundtrip(field) {
                Ok(normalized) => {
                    if let Some(slot) = obj.pointer_mut(&pointer) {
                        *slot = normalized;
                    }
                }
                Err(message) => {
                    tracing::debug!(pointer, message, "known-type re-marshal failed, leaving field as-is");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DeploymentOptions;

    #[test]
    fn remarshals_rollout_podspec() {
        let options = DeploymentOptions::default();
        let ctx = NormalizeContext {
            group: "argoproj.io".into(),
            kind: "Rollout".into(),
            namespace: "ns".into(),
            name: "r".into(),
            options: &options,
        };
        let mut obj = serde_json::json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{"name": "app", "image": "nginx", "unknownExtraField": "x"}]
                    }
                }
            }
        });
        KnownTypesNormalizer::default().normalize(&mut obj, &ctx).unwrap();
        let containers = obj["spec"]["template"]["spec"]["containers"].as_array().unwrap();
        assert!(containers[0].get("unknownExtraField").is_none());
        assert_eq!(containers[0]["name"], "app");
    }

    #[test]
    fn ignores_unregistered_kinds() {
        let options = DeploymentOptions::default();
        let ctx = NormalizeContext {
            group: "apps".into(),
            kind: "Deployment".into(),
            namespace: "ns".into(),
            name: "d".into(),
            options: &options,
        };
        let mut obj = serde_json::json!({"spec": {"template": {"spec": {"foo": "bar"}}}});
        let before = obj.clone();
        KnownTypesNormalizer::default().normalize(&mut obj, &ctx).unwrap();
        assert_eq!(obj, before);
    }
}
