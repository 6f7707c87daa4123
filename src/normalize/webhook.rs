use serde_json::Value;

use super::{NormalizeContext, Normalizer};
use crate::error::NormalizerError;

/// For `MutatingWebhookConfiguration` / `ValidatingWebhookConfiguration`,
/// zeroes out fields the API server auto-fills: `caBundle` when the
/// webhook uses a `service` ref (side-managed, not desired-state), and
/// the default `namespaceSelector`/`objectSelector` the server injects
/// when the manifest leaves them unset.
pub struct WebhookNormalizer;

impl Normalizer for WebhookNormalizer {
    fn name(&self) -> &'static str {
        "WebhookNormalizer"
    }

    fn normalize(&self, obj: &mut Value, ctx: &NormalizeContext) -> Result<(), NormalizerError> {
        if ctx.kind != "MutatingWebhookConfiguration" && ctx.kind != "ValidatingWebhookConfiguration" {
            return Ok(());
        }

        let Some(webhooks) = obj.get_mut("webhooks").and_then(Value::as_array_mut) else {
            return Ok(());
        };

        for webhook in webhooks {
            let Some(webhook_obj) = webhook.as_object_mut() else {
                continue;
            };

            let side_managed = webhook_obj
                .get("clientConfig")
                .and_then(|c| c.get("service"))
                .is_some();
            if side_managed {
                if let Some(client_config) = webhook_obj.get_mut("clientConfig").and_then(Value::as_object_mut) {
                    client_config.remove("caBundle");
                }
            }

            if let Some(selector) = webhook_obj.get("namespaceSelector") {
                if is_empty_selector(selector) {
                    webhook_obj.remove("namespaceSelector");
                }
            }
        }

        Ok(())
    }
}

fn is_empty_selector(selector: &Value) -> bool {
    let Some(map) = selector.as_object() else {
        return false;
    };
    map.get("matchLabels").is_none_or(|v| v.as_object().is_some_and(|m| m.is_empty()))
        && map
            .get("matchExpressions")
            .is_none_or(|v| v.as_array().is_some_and(|a| a.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DeploymentOptions;

    fn ctx<'a>(kind: &str, options: &'a DeploymentOptions) -> NormalizeContext<'a> {
        NormalizeContext {
            group: "admissionregistration.k8s.io".into(),
            kind: kind.into(),
            namespace: "".into(),
            name: "hook".into(),
            options,
        }
    }

    #[test]
    fn strips_cabundle_for_service_backed_webhook() {
        let options = DeploymentOptions::default();
        let mut obj = serde_json::json!({
            "webhooks": [{
                "name": "w",
                "clientConfig": {"service": {"name": "svc"}, "caBundle": "xxx"}
            }]
        });
        WebhookNormalizer.normalize(&mut obj, &ctx("ValidatingWebhookConfiguration", &options)).unwrap();
        assert!(obj["webhooks"][0]["clientConfig"].get("caBundle").is_none());
    }

    #[test]
    fn ignores_non_webhook_kinds() {
        let options = DeploymentOptions::default();
        let mut obj = serde_json::json!({"spec": {}});
        WebhookNormalizer.normalize(&mut obj, &ctx("ConfigMap", &options)).unwrap();
        assert_eq!(obj, serde_json::json!({"spec": {}}));
    }
}
