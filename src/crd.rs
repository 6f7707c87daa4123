//! The `BundleDeployment` custom resource: the work unit this agent
//! converges. A `kube::CustomResource` with a companion status type,
//! carrying the full chart-and-options payload a reconcile needs.

use std::collections::BTreeMap;

use kube::{CustomResource, CustomResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Top-level spec for the BundleDeployment custom resource.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "BundleDeployment",
    plural = "bundledeployments",
    namespaced
)]
#[kube(status = "BundleDeploymentStatus")]
pub struct BundleDeploymentSpec {
    /// Content-addressed payload rendered into Kubernetes objects.
    pub manifest: Manifest,
    /// Deployment options.
    #[serde(default)]
    pub options: DeploymentOptions,
    /// Hash of (manifest, options); advances only when desired state changes.
    pub deployment_id: String,
    /// Last `deployment_id` successfully installed.
    #[serde(default)]
    pub applied_deployment_id: Option<String>,
    /// Skip delete-on-uninstall.
    #[serde(default)]
    pub keep_resources: bool,
    /// Whether CRDs are deleted on uninstall.
    #[serde(default = "default_true")]
    pub delete_crd_resources: bool,
    /// Stable id used as the set-id prefix.
    pub id: String,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub resources: Vec<ManifestResource>,
    #[serde(default)]
    pub values: serde_json::Value,
    #[serde(default)]
    pub chart_metadata: ChartMetadata,
    #[serde(default)]
    pub kustomize_dir: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct ChartMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct ManifestResource {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub encoding: Encoding,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Plain,
    Base64,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct DeploymentOptions {
    #[serde(default)]
    pub default_namespace: Option<String>,
    #[serde(default)]
    pub target_namespace: Option<String>,
    #[serde(default)]
    pub kustomize: Option<KustomizeOptions>,
    #[serde(default)]
    pub helm: Option<HelmOptions>,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub diff: DiffOptions,
    #[serde(default)]
    pub correct_drift: CorrectDriftOptions,
    #[serde(default)]
    pub keep_resources: bool,
    #[serde(default = "default_true")]
    pub delete_crd_resources: bool,
    #[serde(default)]
    pub ignore_options: IgnoreOptions,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct KustomizeOptions {
    pub dir: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct HelmOptions {
    #[serde(default)]
    pub chart: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub release_name: Option<String>,
    #[serde(default)]
    pub values: serde_json::Value,
    #[serde(default)]
    pub values_files: Vec<String>,
    #[serde(default)]
    pub values_from: Vec<ValuesFromSource>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub atomic: bool,
    #[serde(default)]
    pub max_history: Option<usize>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValuesFromSourceKind {
    ConfigMap,
    Secret,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct ValuesFromSource {
    pub kind: ValuesFromSourceKind,
    pub name: String,
    pub namespace: String,
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct DiffOptions {
    #[serde(default)]
    pub compare_patches: Vec<ComparePatch>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ComparePatch {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub json_pointers: Vec<String>,
    #[serde(default)]
    pub operations: Vec<PatchOperationSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct PatchOperationSpec {
    pub op: PatchOp,
    pub path: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
    Test,
    Ignore,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct CorrectDriftOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub keep_fail_history: bool,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct IgnoreOptions {
    #[serde(default = "default_true")]
    pub ignore_status: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            compare_patches: Vec::new(),
        }
    }
}

/// Status reported on the BundleDeployment.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct BundleDeploymentStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub non_modified: bool,
    #[serde(default)]
    pub applied_deployment_id: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub modified_status: Vec<ModifiedStatus>,
    #[serde(default)]
    pub non_ready_status: Vec<NonReadyStatus>,
    #[serde(default)]
    pub display: DisplayStatus,
    #[serde(default)]
    pub resource_counts: ResourceCounts,
    #[serde(default)]
    pub conditions: Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct ModifiedStatus {
    pub kind: String,
    pub api_version: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub patch: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct NonReadyStatus {
    pub kind: String,
    pub api_version: String,
    pub namespace: String,
    pub name: String,
    pub summary: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct DisplayStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct ResourceCounts {
    #[serde(default)]
    pub ready: u32,
    #[serde(default)]
    pub desired_ready: u32,
    #[serde(default)]
    pub not_ready: u32,
    #[serde(default)]
    pub missing: u32,
    #[serde(default)]
    pub orphaned: u32,
    #[serde(default)]
    pub unknown: u32,
    #[serde(default)]
    pub wait_applied: u32,
    #[serde(default)]
    pub modified: u32,
}

/// Hashes `(manifest, options)` into a stable `deployment_id`. Map
/// ordering must not affect the result, so everything goes through
/// `serde_json::to_value` + a canonicalized (sorted-keys) re-serialize
/// before hashing (`serde_json::Value::Object` uses a `BTreeMap` under
/// the `preserve_order` feature being *off*, which is what we rely on
/// here).
pub fn deployment_id(manifest: &Manifest, options: &DeploymentOptions) -> anyhow::Result<String> {
    use sha2::{Digest, Sha256};

    #[derive(Serialize)]
    struct Inputs<'a> {
        manifest: &'a Manifest,
        options: &'a DeploymentOptions,
    }

    let canonical: BTreeMap<String, serde_json::Value> = serde_json::from_value(
        serde_json::to_value(Inputs { manifest, options })?,
    )
    .unwrap_or_default();
    let bytes = serde_json::to_vec(&canonical)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Emits the CRD without schemars `format` annotations that OLM
/// dislikes.
pub fn print_crd_without_formats() -> anyhow::Result<()> {
    let crd = BundleDeployment::crd();
    let mut value = serde_json::to_value(&crd)?;
    strip_format_keys(&mut value);
    println!("{}", serde_yaml::to_string(&value)?);
    Ok(())
}

fn strip_format_keys(v: &mut serde_json::Value) {
    use serde_json::Value::*;
    match v {
        Object(map) => {
            map.remove("format");
            for val in map.values_mut() {
                strip_format_keys(val);
            }
        }
        Array(arr) => {
            for val in arr {
                strip_format_keys(val);
            }
        }
        _ => {}
    }
}
