//! Helm templating step. No Helm Go-template SDK exists in the Rust
//! ecosystem, so chart templates are rendered with `tera` — the same
//! string-templating substitute the pack's Sherpack/shipcat lineage
//! reaches for when a Helm-shaped pipeline needs to live in Rust.

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::Value;
use tera::{Context, Tera};

use crate::crd::{DeploymentOptions, Manifest, ManifestResource, ValuesFromSource};
use crate::error::RenderError;

/// Abstracts "turn a chart + values into objects" so the pipeline isn't
/// hard-wired to one templating engine, and so tests can supply a fake
/// that skips templating and `valuesFrom` resolution entirely.
pub trait ChartRenderer {
    fn render(
        &self,
        manifest: &Manifest,
        options: &DeploymentOptions,
    ) -> Result<Vec<DynamicObject>, RenderError>;
}

/// Default renderer: merges values first, then templates
/// every chart resource (except `raw-yaml/*` and kustomization files,
/// which are handled by their own pipeline stages) through `tera`.
#[derive(Default)]
pub struct TeraChartRenderer;

impl ChartRenderer for TeraChartRenderer {
    fn render(
        &self,
        manifest: &Manifest,
        options: &DeploymentOptions,
    ) -> Result<Vec<DynamicObject>, RenderError> {
        let values = merge_values(manifest, options)?;
        let mut context = Context::from_value(values).map_err(|e| RenderError::Template(e.to_string()))?;
        context.insert("Chart", &manifest.chart_metadata);

        let mut objects = Vec::new();
        for resource in &manifest.resources {
            if is_kustomize_file(&resource.name) || resource.name.starts_with("raw-yaml/") {
                continue;
            }
            if !resource.name.ends_with(".yaml") && !resource.name.ends_with(".yml") {
                continue;
            }

            let content = decode(resource)?;
            let mut tera = Tera::default();
            tera.add_raw_template(&resource.name, &content)
                .map_err(|e| RenderError::Template(format!("{}: {e}", resource.name)))?;
            let rendered = tera
                .render(&resource.name, &context)
                .map_err(|e| RenderError::Template(format!("{}: {e}", resource.name)))?;

            objects.extend(parse_yaml_documents(&rendered)?);
        }

        Ok(objects)
    }
}

fn decode(resource: &ManifestResource) -> Result<String, RenderError> {
    use crate::crd::Encoding;
    match resource.encoding {
        Encoding::Plain => Ok(resource.content.clone()),
        Encoding::Base64 => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(&resource.content)
                .map_err(|e| RenderError::Template(format!("{}: {e}", resource.name)))
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn is_kustomize_file(name: &str) -> bool {
    name.ends_with("kustomization.yaml")
        || name.ends_with("kustomization.yml")
        || name.ends_with("Kustomization")
}

/// Serializes rendered objects back into a `---`-separated multi-doc
/// YAML string, the shape Helm persists as a release revision's
/// rendered manifest of a release revision.
pub fn to_yaml_documents<'a>(objects: impl IntoIterator<Item = &'a DynamicObject>) -> String {
    objects
        .into_iter()
        .filter_map(|obj| serde_yaml::to_string(obj).ok())
        .collect::<Vec<_>>()
        .join("---\n")
}

/// Parses a (possibly multi-document, `---`-separated) YAML string into
/// `DynamicObject`s, skipping documents that lack both apiVersion and
/// kind (used identically by the raw-yaml overlay step).
pub fn parse_yaml_documents(text: &str) -> Result<Vec<DynamicObject>, RenderError> {
    let mut objects = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(doc)
            .map_err(|e| RenderError::Template(format!("invalid yaml document: {e}")))?;
        if value.is_null() {
            continue;
        }
        let Some(obj) = value.as_object() else {
            continue;
        };
        if !obj.contains_key("apiVersion") || !obj.contains_key("kind") {
            continue;
        }
        objects.push(to_dynamic_object(value)?);
    }
    Ok(objects)
}

fn to_dynamic_object(value: Value) -> Result<DynamicObject, RenderError> {
    let api_version = value["apiVersion"].as_str().unwrap_or_default().to_string();
    let kind = value["kind"].as_str().unwrap_or_default().to_string();
    let (group, version) = split_api_version(&api_version);
    let gvk = GroupVersionKind { group, version, kind: kind.clone() };
    let ar = ApiResource::from_gvk(&gvk);

    let mut obj: DynamicObject = serde_json::from_value(value)
        .map_err(|e| RenderError::Template(format!("invalid object shape: {e}")))?;
    obj.types = Some(kube::api::TypeMeta {
        api_version: ar.api_version.clone(),
        kind: ar.kind.clone(),
    });
    Ok(obj)
}

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

use serde::Deserialize as _;

/// Merges values with last-wins precedence:
/// `helm.values`, then `valuesFiles`, then `valuesFrom`. Missing
/// referenced `valuesFrom` sources are a hard error; this default
/// renderer has no cluster access, so any `valuesFrom` entry is
/// unresolvable and always errors, matching "Missing referenced
/// sources are a hard error" for the common case where values are
/// pre-resolved into the manifest by the caller instead.
fn merge_values(manifest: &Manifest, options: &DeploymentOptions) -> Result<Value, RenderError> {
    let mut merged = manifest.values.clone();
    if merged.is_null() {
        merged = Value::Object(Default::default());
    }

    let Some(helm) = &options.helm else {
        return Ok(merged);
    };

    merge_into(&mut merged, &helm.values);

    for file_name in &helm.values_files {
        let Some(resource) = manifest.resources.iter().find(|r| &r.name == file_name) else {
            return Err(RenderError::MissingValuesSource(file_name.clone()));
        };
        let content = decode(resource)?;
        let parsed: Value = serde_yaml::from_str(&content)
            .map_err(|e| RenderError::Template(format!("{file_name}: {e}")))?;
        merge_into(&mut merged, &parsed);
    }

    for source in &helm.values_from {
        return Err(RenderError::MissingValuesSource(describe_values_from(source)));
    }

    Ok(merged)
}

fn describe_values_from(source: &ValuesFromSource) -> String {
    format!(
        "{:?}/{}/{} key {}",
        source.kind, source.namespace, source.name, source.key
    )
}

/// Recursive merge: maps merge key-by-key, any other value type in
/// `overlay` replaces the corresponding value in `base` wholesale.
fn merge_into(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                merge_into(
                    base_map.entry(k.clone()).or_insert(Value::Null),
                    v,
                );
            }
        }
        (base_slot, overlay_value) => {
            if !overlay_value.is_null() {
                *base_slot = overlay_value.clone();
            }
        }
    }
}
