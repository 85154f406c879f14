use k8s_openapi::api::core::v1::EnvVar;
use serde_json::Value;

use crate::crd::{EnvOverrider as EnvOverriderSpec, OverriderOperator};

use super::patch::{apply_patches, containers_named, PatchOperation};
use super::{OverrideError, OverrideInfo, Overrider};

/// Edits the `env` list of matching containers.
///
/// Entries are converted to [`EnvVar`] so every `valueFrom` source
/// survives the round trip unchanged.
#[derive(Clone, Debug, Default)]
pub struct EnvOverrider;

impl Overrider for EnvOverrider {
    fn name(&self) -> &'static str {
        "EnvOverrider"
    }

    fn apply_overrides(&self, obj: &mut Value, info: &OverrideInfo) -> Result<(), OverrideError> {
        for spec in &info.overriders.env_overriders {
            let ops = build_env_patches(obj, spec)?;
            apply_patches(obj, &ops)?;
        }
        Ok(())
    }
}

pub fn build_env_patches(
    obj: &Value,
    spec: &EnvOverriderSpec,
) -> Result<Vec<PatchOperation>, OverrideError> {
    let mut ops = Vec::new();
    for (path, container) in containers_named(obj, &spec.container_name) {
        let current: Option<Vec<EnvVar>> = match container.get("env") {
            Some(env) if !env.is_null() => Some(serde_json::from_value(env.clone())?),
            _ => None,
        };
        let base = current.clone().unwrap_or_default();
        let updated = override_env(base, spec);

        let path = format!("{path}/env");
        match current {
            Some(current) if current == updated => {}
            Some(_) => ops.push(PatchOperation::replace(path, serde_json::to_value(&updated)?)),
            None if updated.is_empty() => {}
            None => ops.push(PatchOperation::add(path, serde_json::to_value(&updated)?)),
        }
    }
    Ok(ops)
}

fn override_env(mut env: Vec<EnvVar>, spec: &EnvOverriderSpec) -> Vec<EnvVar> {
    match spec.operator {
        OverriderOperator::Add => {
            env.extend(spec.value.iter().cloned());
        }
        OverriderOperator::Remove => {
            env.retain(|var| !spec.value.iter().any(|r| r.name == var.name));
        }
        OverriderOperator::Replace => {
            for var in &spec.value {
                match env.iter_mut().find(|existing| existing.name == var.name) {
                    Some(existing) => *existing = var.clone(),
                    None => env.push(var.clone()),
                }
            }
        }
    }
    env
}
