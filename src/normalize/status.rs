use serde_json::Value;

use super::{NormalizeContext, Normalizer};
use crate::error::NormalizerError;

/// Strips `.status` from every object before comparison. The
/// `.status` subresource is never considered drift, even when authors
/// accidentally author a `status:` stanza in their manifest.
pub struct StatusNormalizer;

impl Normalizer for StatusNormalizer {
    fn name(&self) -> &'static str {
        "StatusNormalizer"
    }

    fn normalize(&self, obj: &mut Value, _ctx: &NormalizeContext) -> Result<(), NormalizerError> {
        if let Some(map) = obj.as_object_mut() {
            map.remove("status");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DeploymentOptions;

    #[test]
    fn strips_status_field() {
        let options = DeploymentOptions::default();
        let ctx = NormalizeContext {
            group: "apps".into(),
            kind: "Deployment".into(),
            namespace: "ns".into(),
            name: "d".into(),
            options: &options,
        };
        let mut obj = serde_json::json!({"spec": {}, "status": {"readyReplicas": 3}});
        StatusNormalizer.normalize(&mut obj, &ctx).unwrap();
        assert!(obj.get("status").is_none());
    }
}
