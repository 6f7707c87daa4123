use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation, ReplaceOperation, TestOperation};
use serde_json::Value;

use super::{NormalizeContext, Normalizer};
use crate::crd::{ComparePatch, PatchOp};
use crate::error::NormalizerError;

/// Applies user-supplied JSON patch operations against the *desired*
/// object only. `op = "ignore"` is not a real JSON Patch operation —
/// it is consumed earlier, by `plan::ignore`, to exclude Create
/// actions — and is skipped here. Each operation is compiled and
/// applied independently so one broken op doesn't disable the rest.
pub struct JsonPatchNormalizer {
    rules: Vec<ComparePatch>,
}

impl JsonPatchNormalizer {
    pub fn new(rules: Vec<ComparePatch>) -> Self {
        Self { rules }
    }
}

impl Normalizer for JsonPatchNormalizer {
    fn name(&self) -> &'static str {
        "JSONPatchNormalizer"
    }

    fn normalize(&self, obj: &mut Value, ctx: &NormalizeContext) -> Result<(), NormalizerError> {
        for rule in &self.rules {
            if rule.kind != ctx.kind {
                continue;
            }
            if !rule.namespace.is_empty() && rule.namespace != ctx.namespace {
                continue;
            }
            if !rule.name.is_empty() && rule.name != ctx.name {
                continue;
            }

            for op_spec in &rule.operations {
                if matches!(op_spec.op, PatchOp::Ignore) {
                    continue;
                }
                let operation = match op_spec.op {
                    PatchOp::Add => PatchOperation::Add(AddOperation {
                        path: to_pointer(&op_spec.path),
                        value: op_spec.value.clone(),
                    }),
                    PatchOp::Remove => PatchOperation::Remove(RemoveOperation {
                        path: to_pointer(&op_spec.path),
                    }),
                    PatchOp::Replace => PatchOperation::Replace(ReplaceOperation {
                        path: to_pointer(&op_spec.path),
                        value: op_spec.value.clone(),
                    }),
                    PatchOp::Test => PatchOperation::Test(TestOperation {
                        path: to_pointer(&op_spec.path),
                        value: op_spec.value.clone(),
                    }),
                    PatchOp::Ignore => unreachable!("filtered above"),
                };

                let single = Patch(vec![operation]);
                if let Err(err) = json_patch::patch(obj, &single) {
                    tracing::debug!(path = %op_spec.path, %err, "discarding malformed json patch op");
                }
            }
        }
        Ok(())
    }
}

fn to_pointer(path: &str) -> String {
    path.to_string()
}
