use serde_json::Value;

use super::patch::{apply_patches, containers_named, PatchOperation};
use super::{OverrideError, OverrideInfo, Overrider};

/// Replaces the resource requirements of matching containers wholesale
#[derive(Clone, Debug, Default)]
pub struct ResourcesOverrider;

impl Overrider for ResourcesOverrider {
    fn name(&self) -> &'static str {
        "ResourcesOverrider"
    }

    fn apply_overrides(&self, obj: &mut Value, info: &OverrideInfo) -> Result<(), OverrideError> {
        for spec in &info.overriders.resources_overriders {
            let value = serde_json::to_value(&spec.value)?;
            let doc: &Value = obj;
            let ops: Vec<PatchOperation> = containers_named(doc, &spec.container_name)
                .into_iter()
                .map(|(path, _)| PatchOperation::set(doc, format!("{path}/resources"), value.clone()))
                .collect();
            apply_patches(obj, &ops)?;
        }
        Ok(())
    }
}
