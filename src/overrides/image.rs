use serde_json::Value;
use tracing::debug;

use crate::crd::ImageOverrider as ImageOverriderSpec;

use super::image_ref::ImageReference;
use super::patch::{apply_patches, containers, PatchOperation};
use super::{OverrideError, OverrideInfo, Overrider};

/// Rewrites container image references of pod-bearing kinds
#[derive(Clone, Debug, Default)]
pub struct ImageOverrider;

impl Overrider for ImageOverrider {
    fn name(&self) -> &'static str {
        "ImageOverrider"
    }

    fn apply_overrides(&self, obj: &mut Value, info: &OverrideInfo) -> Result<(), OverrideError> {
        for spec in &info.overriders.image_overriders {
            let ops = build_image_patches(obj, spec)?;
            apply_patches(obj, &ops)?;
        }
        Ok(())
    }
}

/// Patches for one image overrider.
///
/// With a predicate only the image at the predicate path is rewritten;
/// otherwise every container image is.
pub fn build_image_patches(
    obj: &Value,
    spec: &ImageOverriderSpec,
) -> Result<Vec<PatchOperation>, OverrideError> {
    if let Some(predicate) = &spec.predicate {
        let image = obj
            .pointer(&predicate.path)
            .and_then(Value::as_str)
            .ok_or_else(|| OverrideError::InvalidPath(predicate.path.clone()))?;
        let op = PatchOperation::replace(
            predicate.path.clone(),
            Value::String(override_image(image, spec)?),
        );
        return Ok(vec![op]);
    }

    let mut ops = Vec::new();
    for (path, container) in containers(obj) {
        let Some(image) = container.get("image").and_then(Value::as_str) else {
            debug!("container at {} has no image, skipping", path);
            continue;
        };
        ops.push(PatchOperation::replace(
            format!("{path}/image"),
            Value::String(override_image(image, spec)?),
        ));
    }
    Ok(ops)
}

fn override_image(image: &str, spec: &ImageOverriderSpec) -> Result<String, OverrideError> {
    let mut reference = ImageReference::parse(image)?;
    reference.apply(spec.component, spec.operator, &spec.value);
    Ok(reference.to_string())
}
