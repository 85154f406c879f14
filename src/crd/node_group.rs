//! NodeGroup custom resource
//!
//! A NodeGroup selects worker nodes by name and/or labels. Member nodes are
//! stamped with the belonging-to label so workloads can target the group.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "apps.kubeedge.io",
    version = "v1alpha1",
    kind = "NodeGroup",
    status = "NodeGroupStatus",
    shortname = "ng",
    printcolumn = r#"{"name":"Nodes","type":"string","jsonPath":".spec.nodes"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupSpec {
    /// Names of nodes that belong to this group. Nodes that do not exist
    /// are reported in status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,

    /// Nodes carrying all of these labels belong to this group. An empty
    /// map selects no nodes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupStatus {
    /// Per-node membership, sorted by node name
    #[serde(default)]
    pub node_statuses: Vec<NodeStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub node_name: String,
    pub ready_status: ReadyStatus,
    pub selection_status: SelectionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selection_status_reason: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ReadyStatus {
    Ready,
    NotReady,
    #[default]
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum SelectionStatus {
    Succeeded,
    Failed,
}

impl std::fmt::Display for ReadyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadyStatus::Ready => write!(f, "Ready"),
            ReadyStatus::NotReady => write!(f, "NotReady"),
            ReadyStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl NodeStatus {
    pub fn succeeded(node_name: &str, ready_status: ReadyStatus) -> Self {
        Self {
            node_name: node_name.to_string(),
            ready_status,
            selection_status: SelectionStatus::Succeeded,
            selection_status_reason: String::new(),
        }
    }

    pub fn failed(node_name: &str, ready_status: ReadyStatus, reason: impl Into<String>) -> Self {
        Self {
            node_name: node_name.to_string(),
            ready_status,
            selection_status: SelectionStatus::Failed,
            selection_status_reason: reason.into(),
        }
    }
}
