//! Reconciler for NodeGroup membership
//!
//! Keeps the belonging-to label on exactly the nodes a NodeGroup selects,
//! evicts the group's pods from nodes that leave it and reports per-node
//! selection results in status.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::controller::client::NodeGroupClient;
use crate::controller::finalizers::{
    has_finalizer, is_being_deleted, with_finalizer, without_finalizer,
};
use crate::crd::well_known::LABEL_BELONGING_TO;
use crate::crd::{NodeGroup, NodeGroupStatus, NodeStatus};
use crate::error::{Error, Result};

use super::selection::{
    belonging_group, is_pinned_to_group, membership_label_patch, ready_status_of,
};

pub struct NodeGroupReconciler {
    client: Arc<dyn NodeGroupClient>,
}

impl NodeGroupReconciler {
    pub fn new(client: Arc<dyn NodeGroupClient>) -> Self {
        Self { client }
    }

    #[instrument(skip(self), fields(node_group = %name))]
    pub async fn reconcile(&self, name: &str) -> Result<Action> {
        let Some(group) = self.client.get_node_group(name).await? else {
            debug!("NodeGroup {} not found, nothing to do", name);
            return Ok(Action::await_change());
        };

        if is_being_deleted(&group) {
            return self.cleanup(&group).await;
        }

        if !has_finalizer(&group) {
            self.client
                .set_node_group_finalizers(name, &with_finalizer(&group))
                .await?;
            info!("Added finalizer to NodeGroup: {}", name);
            return Ok(Action::await_change());
        }

        self.sync_membership(&group).await
    }

    /// Release every member, then drop the finalizer
    async fn cleanup(&self, group: &NodeGroup) -> Result<Action> {
        let name = group.name_any();
        info!("Cleaning up NodeGroup: {}", name);

        let mut errors = Vec::new();
        for node in self.members_of(&name).await? {
            if let Err(e) = self.evict(&node, &name).await {
                errors.push(e);
            }
        }
        Error::aggregate(errors)?;

        if has_finalizer(group) {
            self.client
                .set_node_group_finalizers(&name, &without_finalizer(group))
                .await?;
            info!("Removed finalizer from NodeGroup: {}", name);
        }
        Ok(Action::await_change())
    }

    async fn members_of(&self, group: &str) -> Result<Vec<Node>> {
        let selector = BTreeMap::from([(LABEL_BELONGING_TO.to_string(), group.to_string())]);
        self.client.list_nodes_with_labels(&selector).await
    }

    /// Remove the label from `node` and delete pods pinned to `group` on it
    async fn evict(&self, node: &Node, group: &str) -> Result<()> {
        let node_name = node.name_any();
        self.client
            .patch_node(&node_name, &membership_label_patch(node, None))
            .await?;
        info!("Node {} left NodeGroup {}", node_name, group);

        let mut errors = Vec::new();
        for pod in self.client.list_pods_on_node(&node_name).await? {
            if !is_pinned_to_group(&pod, group) {
                continue;
            }
            let namespace = pod.namespace().unwrap_or_default();
            let pod_name = pod.name_any();
            match self.client.delete_pod(&namespace, &pod_name).await {
                Ok(()) => info!(
                    "Evicted pod {}/{} from node {} (NodeGroup {})",
                    namespace, pod_name, node_name, group
                ),
                Err(e) => errors.push(e),
            }
        }
        Error::aggregate(errors)
    }

    /// Nodes selected by `group`, and the named nodes that do not exist
    async fn select_nodes(&self, group: &NodeGroup) -> Result<(BTreeMap<String, Node>, BTreeSet<String>)> {
        let mut selected = BTreeMap::new();
        if !group.spec.match_labels.is_empty() {
            for node in self.client.list_nodes_with_labels(&group.spec.match_labels).await? {
                selected.insert(node.name_any(), node);
            }
        }

        let mut missing = BTreeSet::new();
        for name in &group.spec.nodes {
            if selected.contains_key(name) {
                continue;
            }
            match self.client.get_node(name).await? {
                Some(node) => {
                    selected.insert(name.clone(), node);
                }
                None => {
                    missing.insert(name.clone());
                }
            }
        }
        Ok((selected, missing))
    }

    async fn sync_membership(&self, group: &NodeGroup) -> Result<Action> {
        let name = group.name_any();
        let (selected, missing) = self.select_nodes(group).await?;
        let mut errors = Vec::new();

        for node in self.members_of(&name).await? {
            if selected.contains_key(&node.name_any()) {
                continue;
            }
            if let Err(e) = self.evict(&node, &name).await {
                warn!("Failed to release node {} from {}: {}", node.name_any(), name, e);
                errors.push(e);
            }
        }

        let mut statuses = Vec::with_capacity(selected.len() + missing.len());
        for (node_name, node) in &selected {
            let ready = ready_status_of(node);
            let status = match belonging_group(node) {
                Some(current) if current == name => NodeStatus::succeeded(node_name, ready),
                Some(other) => {
                    NodeStatus::failed(node_name, ready, format!("already belongs to {other}"))
                }
                None => {
                    let patch = membership_label_patch(node, Some(&name));
                    match self.client.patch_node(node_name, &patch).await {
                        Ok(()) => {
                            info!("Node {} joined NodeGroup {}", node_name, name);
                            NodeStatus::succeeded(node_name, ready)
                        }
                        Err(e) => {
                            let status = NodeStatus::failed(
                                node_name,
                                ready,
                                format!("failed to add belonging-to label: {e}"),
                            );
                            errors.push(e);
                            status
                        }
                    }
                }
            };
            statuses.push(status);
        }

        for node_name in &missing {
            statuses.push(NodeStatus::failed(
                node_name,
                Default::default(),
                "node does not exist",
            ));
        }
        statuses.sort_by(|a, b| a.node_name.cmp(&b.node_name));

        let current = group
            .status
            .as_ref()
            .map(|s| s.node_statuses.as_slice())
            .unwrap_or_default();
        if current != statuses.as_slice() {
            let status = NodeGroupStatus {
                node_statuses: statuses,
            };
            if let Err(e) = self.client.update_node_group_status(&name, &status).await {
                errors.push(e);
            }
        }

        Error::aggregate(errors)?;
        Ok(Action::await_change())
    }
}
