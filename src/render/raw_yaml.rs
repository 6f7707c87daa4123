//! Raw-YAML folder overlay: appends objects parsed from chart files
//! under `raw-yaml/`, skipping entries lacking apiVersion+kind.

use kube::api::DynamicObject;

use crate::crd::Manifest;
use crate::error::RenderError;
use crate::render::helm::parse_yaml_documents;

pub fn overlay(manifest: &Manifest) -> Result<Vec<DynamicObject>, RenderError> {
    let mut objects = Vec::new();
    for resource in &manifest.resources {
        if !resource.name.starts_with("raw-yaml/") {
            continue;
        }
        if !resource.name.ends_with(".yaml") && !resource.name.ends_with(".yml") {
            continue;
        }
        objects.extend(parse_yaml_documents(&resource.content)?);
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ManifestResource;

    #[test]
    fn overlays_raw_yaml_folder_only() {
        let manifest = Manifest {
            resources: vec![
                ManifestResource {
                    name: "raw-yaml/extra.yaml".into(),
                    content: "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: extra\n".into(),
                    encoding: Default::default(),
                },
                ManifestResource {
                    name: "templates/deployment.yaml".into(),
                    content: "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: d\n".into(),
                    encoding: Default::default(),
                },
            ],
            ..Default::default()
        };
        let objects = overlay(&manifest).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].metadata.name.as_deref(), Some("extra"));
    }

    #[test]
    fn skips_documents_missing_apiversion_or_kind() {
        let manifest = Manifest {
            resources: vec![ManifestResource {
                name: "raw-yaml/partial.yaml".into(),
                content: "metadata:\n  name: nope\n".into(),
                encoding: Default::default(),
            }],
            ..Default::default()
        };
        assert!(overlay(&manifest).unwrap().is_empty());
    }
}
