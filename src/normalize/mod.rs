//! C4 — Normalizer Pipeline: removes fields that are defaulted,
//! webhook-managed, or user-ignored before diffing. Normalizers are
//! dynamically dispatched over a registry, the same
//! trait-object-over-a-closed-set-of-kinds idiom `ClusterResources`
//! uses in the pack's stackable-operator reference.

mod ignore;
mod jsonpatch;
mod known_types;
mod status;
mod webhook;

pub use ignore::IgnoreNormalizer;
pub use jsonpatch::JsonPatchNormalizer;
pub use known_types::KnownTypesNormalizer;
pub use status::StatusNormalizer;
pub use webhook::WebhookNormalizer;

use serde_json::Value;

use crate::crd::DeploymentOptions;
use crate::error::NormalizerError;

/// Context available to every normalizer: the object's coordinates and
/// the options that shaped the reconcile.
#[derive(Debug, Clone)]
pub struct NormalizeContext<'a> {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub options: &'a DeploymentOptions,
}

/// A transform that removes fields from an object so they are excluded
/// from drift detection (GLOSSARY). Applied in-place.
pub trait Normalizer {
    fn name(&self) -> &'static str;
    fn normalize(&self, obj: &mut Value, ctx: &NormalizeContext) -> Result<(), NormalizerError>;
}

/// The fixed-order composite pipeline.
pub struct NormalizerPipeline {
    normalizers: Vec<Box<dyn Normalizer + Send + Sync>>,
}

impl NormalizerPipeline {
    pub fn default_for(options: &DeploymentOptions) -> Self {
        Self {
            normalizers: vec![
                Box::new(StatusNormalizer),
                Box::new(WebhookNormalizer),
                Box::new(IgnoreNormalizer::new(options.diff.compare_patches.clone())),
                Box::new(KnownTypesNormalizer::default()),
                Box::new(JsonPatchNormalizer::new(options.diff.compare_patches.clone())),
            ],
        }
    }

    /// Applies every normalizer in order. A normalizer error is logged
    /// at `debug!` and that *one* normalizer's effect is skipped for
    /// this object; the remaining normalizers still run.
    pub fn apply(&self, obj: &mut Value, ctx: &NormalizeContext) {
        for normalizer in &self.normalizers {
            if let Err(err) = normalizer.normalize(obj, ctx) {
                tracing::debug!(normalizer = normalizer.name(), %err, "normalizer skipped");
            }
        }
    }
}

/// Rules are merged by the API server from other ClusterRoles when a
/// ClusterRole opts into aggregation, so its `rules` field must never
/// be treated as drift.
pub fn is_aggregated_cluster_role(kind: &str, obj: &Value) -> bool {
    kind == "ClusterRole" && !obj.get("aggregationRule").is_none_or(Value::is_null)
}

/// Strips the `rules` field from an aggregated ClusterRole prior to
/// comparison.
pub fn strip_aggregated_rules(kind: &str, obj: &mut Value) {
    if is_aggregated_cluster_role(kind, obj) {
        if let Some(map) = obj.as_object_mut() {
            map.remove("rules");
        }
    }
}
