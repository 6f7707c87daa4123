//! C1 — Manifest Renderer: materializes a bundle into a flat set of
//! Kubernetes objects (Helm template -> Kustomize -> raw-YAML overlay),
//! then enforces the target namespace and CRD retention policy.

mod helm;
mod kustomize;
mod namespace;
mod raw_yaml;

pub use helm::{parse_yaml_documents, to_yaml_documents, ChartRenderer, TeraChartRenderer};

use kube::api::DynamicObject;

use crate::crd::{DeploymentOptions, Manifest};
use crate::error::RenderError;
use crate::stamp;

/// Runs the fixed-order rendering pipeline:
/// 1. Helm templating
/// 2. Kustomize (only if a kustomization file is present)
/// 3. Raw-YAML folder overlay
/// 4. Target-namespace enforcement
/// 5. CRD retention annotation
pub fn render(
    manifest: &Manifest,
    options: &DeploymentOptions,
    renderer: &dyn ChartRenderer,
) -> Result<Vec<DynamicObject>, RenderError> {
    let mut objects = renderer.render(manifest, options)?;

    if kustomize::has_kustomization(manifest) {
        let dir = options
            .kustomize
            .as_ref()
            .map(|k| k.dir.as_str())
            .unwrap_or(".");
        objects = kustomize::build(dir, objects)?;
    }

    objects.extend(raw_yaml::overlay(manifest)?);

    namespace::enforce_target_namespace(&mut objects, options)?;

    if !options.delete_crd_resources {
        for obj in objects.iter_mut() {
            if obj.types.as_ref().map(|t| t.kind.as_str()) == Some("CustomResourceDefinition") {
                stamp::annotate_crd_retain(obj);
            }
        }
    }

    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::helm::TeraChartRenderer;
    use crate::crd::{Manifest, DeploymentOptions};

    #[test]
    fn empty_manifest_renders_no_objects() {
        let manifest = Manifest::default();
        let options = DeploymentOptions::default();
        let renderer = TeraChartRenderer::default();
        let objects = render(&manifest, &options, &renderer).unwrap();
        assert!(objects.is_empty());
    }
}
