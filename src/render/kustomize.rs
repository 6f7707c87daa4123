//! Kustomize step: only entered when a resource name ends in a
//! kustomization file name — kustomize imposes filename restrictions
//! fleet does not otherwise care about, so bundles without one skip
//! this stage entirely.

use kube::api::DynamicObject;
use std::io::Write;
use std::process::Command;

use crate::crd::Manifest;
use crate::error::RenderError;
use crate::render::helm::parse_yaml_documents;

pub fn has_kustomization(manifest: &Manifest) -> bool {
    manifest.resources.iter().any(|r| {
        r.name.ends_with("kustomization.yaml")
            || r.name.ends_with("kustomization.yml")
            || r.name.ends_with("Kustomization")
    })
}

/// Feeds the already-rendered objects through `kustomize build`, the
/// same "shell out to the real tool" approach the pack's
/// Qovery/headwind/hops Helm drivers take for Helm itself: there is no
/// kustomize Rust SDK in the ecosystem, so the external binary is the
/// idiomatic integration point.
pub fn build(dir: &str, objects: Vec<DynamicObject>) -> Result<Vec<DynamicObject>, RenderError> {
    if objects.is_empty() {
        return Ok(objects);
    }

    let mut child = Command::new("kustomize")
        .arg("build")
        .arg(dir)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| RenderError::Kustomize(format!("spawn kustomize: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        let input = render_objects_as_yaml(&objects)?;
        stdin
            .write_all(input.as_bytes())
            .map_err(|e| RenderError::Kustomize(format!("write kustomize stdin: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| RenderError::Kustomize(format!("wait for kustomize: {e}")))?;

    if !output.status.success() {
        return Err(RenderError::Kustomize(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    parse_yaml_documents(&String::from_utf8_lossy(&output.stdout))
}

fn render_objects_as_yaml(objects: &[DynamicObject]) -> Result<String, RenderError> {
    let mut out = String::new();
    for obj in objects {
        out.push_str("---\n");
        out.push_str(
            &serde_yaml::to_string(obj)
                .map_err(|e| RenderError::Kustomize(format!("serialize object: {e}")))?,
        );
    }
    Ok(out)
}
