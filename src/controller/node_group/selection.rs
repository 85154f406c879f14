//! Node membership rules for NodeGroups

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use serde_json::{json, Value};

use crate::controller::merge_patch::create_merge_patch;
use crate::crd::well_known::LABEL_BELONGING_TO;
use crate::crd::{NodeGroup, ReadyStatus};

/// Readiness from the node's `Ready` condition
pub fn ready_status_of(node: &Node) -> ReadyStatus {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"));

    match ready.map(|c| c.status.as_str()) {
        Some("True") => ReadyStatus::Ready,
        Some("False") => ReadyStatus::NotReady,
        _ => ReadyStatus::Unknown,
    }
}

/// Group the node currently belongs to, if any
pub fn belonging_group(node: &Node) -> Option<&str> {
    node.labels().get(LABEL_BELONGING_TO).map(String::as_str)
}

/// Whether `group` selects `node` by name or by labels.
///
/// An empty `matchLabels` selects nothing.
pub fn selects_node(group: &NodeGroup, node: &Node) -> bool {
    let name = node.name_any();
    if group.spec.nodes.iter().any(|n| *n == name) {
        return true;
    }

    let labels = node.labels();
    !group.spec.match_labels.is_empty()
        && group
            .spec
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
}

/// Groups to reconcile after `node` changed.
///
/// A member node maps to its own group. Any other node maps to every group
/// that would select it.
pub fn node_groups_for_node(node: &Node, groups: &[Arc<NodeGroup>]) -> Vec<ObjectRef<NodeGroup>> {
    if let Some(group) = belonging_group(node) {
        return vec![ObjectRef::new(group)];
    }

    groups
        .iter()
        .filter(|group| selects_node(group, node))
        .map(|group| ObjectRef::new(&group.name_any()))
        .collect()
}

/// Merge patch setting (or with `None`, removing) the belonging-to label.
///
/// Built as a diff of the node's labels against a modified copy so other
/// labels are never written. Claiming a node carries the node's
/// resourceVersion, so of two groups racing for it only the first write
/// lands and the other gets a conflict.
pub fn membership_label_patch(node: &Node, group: Option<&str>) -> Value {
    let current = node.labels().clone();
    let mut desired: BTreeMap<String, String> = current.clone();
    match group {
        Some(group) => {
            desired.insert(LABEL_BELONGING_TO.to_string(), group.to_string());
        }
        None => {
            desired.remove(LABEL_BELONGING_TO);
        }
    }

    let mut patch = create_merge_patch(
        &json!({"metadata": {"labels": current}}),
        &json!({"metadata": {"labels": desired}}),
    );
    if let (Some(_), Some(version)) = (group, node.resource_version()) {
        patch["metadata"]["resourceVersion"] = Value::String(version);
    }
    patch
}

/// Pods pinned to `group` through their node selector
pub fn is_pinned_to_group(pod: &Pod, group: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_selector.as_ref())
        .and_then(|s| s.get(LABEL_BELONGING_TO))
        .is_some_and(|g| g == group)
}
