use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, PodSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde_json::Value;

use crate::crd::well_known::LABEL_BELONGING_TO;

use super::patch::{apply_patches, kind_of, PatchOperation};
use super::{OverrideError, OverrideInfo, Overrider};

const POD_SPEC_PATH: &str = "/spec/template/spec";
const NODE_SELECTOR_PATH: &str = "/spec/template/spec/nodeSelector";
const AFFINITY_PATH: &str = "/spec/template/spec/affinity";

/// Pins Deployments to their target.
///
/// A node group target becomes a `nodeSelector` on the belonging-to label.
/// A label selector target becomes a required node affinity term; pod
/// affinity and anti-affinity already on the template are kept.
#[derive(Clone, Debug, Default)]
pub struct NodeSelectorOverrider;

impl Overrider for NodeSelectorOverrider {
    fn name(&self) -> &'static str {
        "NodeSelectorOverrider"
    }

    fn apply_overrides(&self, obj: &mut Value, info: &OverrideInfo) -> Result<(), OverrideError> {
        if kind_of(obj) != "Deployment" {
            return Ok(());
        }

        let pod_spec: PodSpec = match obj.pointer(POD_SPEC_PATH) {
            Some(spec) => serde_json::from_value(spec.clone())?,
            None => return Err(OverrideError::InvalidPath(POD_SPEC_PATH.to_string())),
        };

        let mut ops = Vec::new();

        if !info.target_node_group.is_empty() {
            let mut node_selector: BTreeMap<String, String> =
                pod_spec.node_selector.unwrap_or_default();
            node_selector.insert(
                LABEL_BELONGING_TO.to_string(),
                info.target_node_group.clone(),
            );
            ops.push(PatchOperation::set(
                obj,
                NODE_SELECTOR_PATH,
                serde_json::to_value(&node_selector)?,
            ));
        }

        if info.has_label_selector() {
            let mut affinity: Affinity = pod_spec.affinity.unwrap_or_default();
            affinity.node_affinity = Some(required_node_affinity(&info.target_node_label_selector));
            ops.push(PatchOperation::set(
                obj,
                AFFINITY_PATH,
                serde_json::to_value(&affinity)?,
            ));
        }

        apply_patches(obj, &ops)
    }
}

/// Required node affinity with one term matching `selector`.
///
/// Each `matchLabels` entry becomes `key In [value]`; match expressions are
/// carried over as-is. Requirements are ordered by key.
pub fn required_node_affinity(selector: &LabelSelector) -> NodeAffinity {
    let mut requirements: Vec<NodeSelectorRequirement> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(key, value)| NodeSelectorRequirement {
            key: key.clone(),
            operator: "In".to_string(),
            values: Some(vec![value.clone()]),
        })
        .collect();

    requirements.extend(selector.match_expressions.iter().flatten().map(|e| {
        NodeSelectorRequirement {
            key: e.key.clone(),
            operator: e.operator.clone(),
            values: e.values.clone(),
        }
    }));
    requirements.sort_by(|a, b| a.key.cmp(&b.key));

    NodeAffinity {
        required_during_scheduling_ignored_during_execution: Some(NodeSelector {
            node_selector_terms: vec![NodeSelectorTerm {
                match_expressions: Some(requirements),
                match_fields: None,
            }],
        }),
        preferred_during_scheduling_ignored_during_execution: None,
    }
}
