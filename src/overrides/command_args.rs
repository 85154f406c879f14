use serde_json::Value;
use tracing::info;

use crate::crd::{CommandArgsOverrider, OverriderOperator};

use super::patch::{apply_patches, containers_named, PatchOperation};
use super::{OverrideError, OverrideInfo, Overrider};

/// Container list field rewritten by a [`ContainerListOverrider`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerListField {
    Command,
    Args,
}

impl ContainerListField {
    fn json_key(self) -> &'static str {
        match self {
            ContainerListField::Command => "command",
            ContainerListField::Args => "args",
        }
    }
}

/// Appends to or removes from a container's `command` or `args`.
///
/// Only `add` and `remove` are supported. Containers that do not match by
/// name and kinds without containers are left alone.
#[derive(Clone, Debug)]
pub struct ContainerListOverrider {
    field: ContainerListField,
}

impl ContainerListOverrider {
    pub fn command() -> Self {
        Self {
            field: ContainerListField::Command,
        }
    }

    pub fn args() -> Self {
        Self {
            field: ContainerListField::Args,
        }
    }

    fn specs<'a>(&self, info: &'a OverrideInfo) -> &'a [CommandArgsOverrider] {
        match self.field {
            ContainerListField::Command => &info.overriders.command_overriders,
            ContainerListField::Args => &info.overriders.args_overriders,
        }
    }

    /// Patches for one overrider entry
    pub fn build_patches(&self, obj: &Value, spec: &CommandArgsOverrider) -> Vec<PatchOperation> {
        let key = self.field.json_key();
        let mut ops = Vec::new();

        for (path, container) in containers_named(obj, &spec.container_name) {
            let current: Option<Vec<String>> = container
                .get(key)
                .and_then(|v| serde_json::from_value(v.clone()).ok());
            let path = format!("{path}/{key}");

            match spec.operator {
                OverriderOperator::Add => {
                    let exists = current.is_some();
                    let mut values = current.unwrap_or_default();
                    values.extend(spec.value.iter().cloned());
                    let value = Value::from(values);
                    ops.push(if exists {
                        PatchOperation::replace(path, value)
                    } else {
                        PatchOperation::add(path, value)
                    });
                }
                OverriderOperator::Remove => {
                    let Some(current) = current else {
                        continue;
                    };
                    let kept: Vec<String> = current
                        .iter()
                        .filter(|v| !spec.value.contains(v))
                        .cloned()
                        .collect();
                    if kept.len() != current.len() {
                        ops.push(PatchOperation::replace(path, Value::from(kept)));
                    }
                }
                other => {
                    info!(
                        "{} does not support operator {}, skipping container {}",
                        self.name(),
                        other,
                        spec.container_name
                    );
                }
            }
        }
        ops
    }
}

impl Overrider for ContainerListOverrider {
    fn name(&self) -> &'static str {
        match self.field {
            ContainerListField::Command => "CommandOverrider",
            ContainerListField::Args => "ArgsOverrider",
        }
    }

    fn apply_overrides(&self, obj: &mut Value, info: &OverrideInfo) -> Result<(), OverrideError> {
        for spec in self.specs(info) {
            let ops = self.build_patches(obj, spec);
            apply_patches(obj, &ops)?;
        }
        Ok(())
    }
}
