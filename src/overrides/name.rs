use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::patch::{apply_patches, PatchOperation};
use super::{OverrideError, OverrideInfo, Overrider};

const LABEL_SELECTOR_SUFFIX_PREFIX: &str = "ls-";
const HASH_LEN: usize = 10;

/// Makes produced object names unique per target.
///
/// A label selector takes precedence over a node group: the name gets an
/// `-ls-<hash>` suffix. Otherwise the node group name is appended.
#[derive(Clone, Debug, Default)]
pub struct NameOverrider;

impl Overrider for NameOverrider {
    fn name(&self) -> &'static str {
        "NameOverrider"
    }

    fn apply_overrides(&self, obj: &mut Value, info: &OverrideInfo) -> Result<(), OverrideError> {
        let suffix = if info.has_label_selector() {
            create_suffix_from_selector(&info.target_node_label_selector)
        } else if !info.target_node_group.is_empty() {
            info.target_node_group.clone()
        } else {
            return Ok(());
        };

        let old_name = obj
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let new_name = format!("{old_name}-{suffix}");
        let op = PatchOperation::set(obj, "/metadata/name", Value::String(new_name));
        apply_patches(obj, &[op])
    }
}

/// `ls-<hash>` suffix for a label selector.
///
/// The hash covers the sorted `key=value` pairs and any match expressions,
/// so equivalent selectors always produce the same suffix.
pub fn create_suffix_from_selector(selector: &LabelSelector) -> String {
    let mut hasher = Sha256::new();
    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            hasher.update(format!("{key}={value};"));
        }
    }

    let mut expressions: Vec<String> = selector
        .match_expressions
        .iter()
        .flatten()
        .map(|e| {
            let mut values = e.values.clone().unwrap_or_default();
            values.sort();
            format!("{} {} {}", e.key, e.operator, values.join(","))
        })
        .collect();
    expressions.sort();
    for expression in expressions {
        hasher.update(format!("{expression};"));
    }

    let digest = hex::encode(hasher.finalize());
    format!("{LABEL_SELECTOR_SUFFIX_PREFIX}{}", &digest[..HASH_LEN])
}
