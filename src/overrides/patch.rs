//! JSON patch plumbing shared by the overriders
//!
//! Overriders describe their edits as RFC 6902 operations which are applied
//! in one go, so a failing patch leaves the object untouched.

use serde::Serialize;
use serde_json::Value;

use super::OverrideError;

const POD_SPEC_PREFIX: &str = "/spec";
const TEMPLATE_POD_SPEC_PREFIX: &str = "/spec/template/spec";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
}

/// A single `{op, path, value}` edit
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: Value,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value,
        }
    }

    /// `replace` when `path` already exists in `obj`, `add` otherwise
    pub fn set(obj: &Value, path: impl Into<String>, value: Value) -> Self {
        let path = path.into();
        if obj.pointer(&path).is_some() {
            Self::replace(path, value)
        } else {
            Self::add(path, value)
        }
    }
}

/// Apply `ops` to `obj` atomically.
pub fn apply_patches(obj: &mut Value, ops: &[PatchOperation]) -> Result<(), OverrideError> {
    if ops.is_empty() {
        return Ok(());
    }
    let patch: json_patch::Patch = serde_json::from_value(serde_json::to_value(ops)?)?;
    let mut patched = obj.clone();
    json_patch::patch(&mut patched, &patch)?;
    *obj = patched;
    Ok(())
}

/// JSON pointer of the pod spec for kinds that carry one
pub fn pod_spec_prefix(kind: &str) -> Option<&'static str> {
    match kind {
        "Pod" => Some(POD_SPEC_PREFIX),
        "Deployment" | "ReplicaSet" | "DaemonSet" | "StatefulSet" | "Job" => {
            Some(TEMPLATE_POD_SPEC_PREFIX)
        }
        _ => None,
    }
}

pub fn kind_of(obj: &Value) -> &str {
    obj.get("kind").and_then(Value::as_str).unwrap_or_default()
}

/// Containers of a pod-bearing object together with their JSON pointer.
///
/// Returns an empty list for other kinds or when the object has no
/// container list.
pub fn containers(obj: &Value) -> Vec<(String, &Value)> {
    let Some(prefix) = pod_spec_prefix(kind_of(obj)) else {
        return Vec::new();
    };
    obj.pointer(&format!("{prefix}/containers"))
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .enumerate()
                .map(|(i, c)| (format!("{prefix}/containers/{i}"), c))
                .collect()
        })
        .unwrap_or_default()
}

/// Containers whose `name` equals `container_name`
pub fn containers_named<'a>(obj: &'a Value, container_name: &str) -> Vec<(String, &'a Value)> {
    containers(obj)
        .into_iter()
        .filter(|(_, c)| c.get("name").and_then(Value::as_str) == Some(container_name))
        .collect()
}
