use serde_json::Value;

use super::patch::{apply_patches, kind_of, PatchOperation};
use super::{OverrideError, OverrideInfo, Overrider};

/// Sets `spec.replicas` of Deployments
#[derive(Clone, Debug, Default)]
pub struct ReplicasOverrider;

impl Overrider for ReplicasOverrider {
    fn name(&self) -> &'static str {
        "ReplicasOverrider"
    }

    fn apply_overrides(&self, obj: &mut Value, info: &OverrideInfo) -> Result<(), OverrideError> {
        let Some(replicas) = info.overriders.replicas else {
            return Ok(());
        };

        let kind = kind_of(obj);
        if kind != "Deployment" {
            return Err(OverrideError::UnsupportedKind {
                overrider: self.name(),
                kind: kind.to_string(),
            });
        }

        let op = PatchOperation::set(obj, "/spec/replicas", Value::from(replicas));
        apply_patches(obj, &[op])
    }
}
