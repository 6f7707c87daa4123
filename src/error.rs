//! Structured error taxonomy for the BundleDeployment agent.
//!
//! Component functions return these upward; the reconciler is the only
//! place that turns them into conditions (see `reconciler::status`).

use std::fmt;

/// Errors produced anywhere in the render -> stamp -> release -> plan ->
/// drift pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("invalid resource: {0}")]
    InvalidResource(String),

    #[error("install failed: {0}")]
    Install(String),

    #[error("upgrade failed: {0}")]
    Upgrade(String),

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error("{namespace}/{name}: {message} (patch: {patch_excerpt})")]
    HpaFieldShape {
        namespace: String,
        name: String,
        message: String,
        patch_excerpt: String,
    },

    #[error("{namespace}/{name}: failed to unmarshal patch: {message} (patch: {patch_excerpt})")]
    PatchUnmarshal {
        namespace: String,
        name: String,
        message: String,
        patch_excerpt: String,
    },

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Errors raised while materializing a bundle's manifest into objects.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("missing values source: {0}")]
    MissingValuesSource(String),

    #[error("kustomize build failed: {0}")]
    Kustomize(String),

    #[error("unknown raw-yaml file: {0}")]
    UnknownRawYaml(String),

    #[error("invalid cluster scoped object {kind}/{name}: use defaultNamespace, not namespace")]
    ClusterScopedUnderTargetNamespace { kind: String, name: String },

    #[error("template render failed: {0}")]
    Template(String),
}

/// Non-fatal normalizer failures. Logged at `debug!` per the error
/// handling design; the offending operation is discarded and the rest
/// of the pipeline proceeds.
#[derive(Debug, thiserror::Error)]
pub enum NormalizerError {
    #[error("bad ignore-rule regex {pattern:?}: {source}")]
    BadRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("malformed json pointer {pointer:?}: {message}")]
    MalformedPointer { pointer: String, message: String },
}

/// Truncates a patch (or any debug payload) to 1024 chars for inclusion
/// in an error message, per the error-handling design.
pub fn truncate_patch(patch: impl fmt::Debug) -> String {
    let rendered = format!("{patch:?}");
    if rendered.len() > 1024 {
        let mut truncated = rendered.chars().take(1024).collect::<String>();
        truncated.push_str("...(truncated)");
        truncated
    } else {
        rendered
    }
}

/// Errors accumulated across multiple per-object operations in a single
/// reconcile pass, rather than short-circuited, so a complete picture is
/// reported to the user.
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    errors: Vec<Error>,
}

impl ErrorAccumulator {
    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_message(self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
