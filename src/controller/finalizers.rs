//! Finalizer handling for NodeGroup cleanup
//!
//! The finalizer keeps a deleted NodeGroup around until every member node
//! has lost its belonging-to label and the group's pods have been evicted.

use kube::ResourceExt;

use crate::crd::well_known::NODE_GROUP_FINALIZER;
use crate::crd::NodeGroup;

/// Check if the group is being deleted
pub fn is_being_deleted(group: &NodeGroup) -> bool {
    group.metadata.deletion_timestamp.is_some()
}

/// Check if the group has our finalizer
pub fn has_finalizer(group: &NodeGroup) -> bool {
    group.finalizers().iter().any(|f| f == NODE_GROUP_FINALIZER)
}

/// Finalizer list with ours appended
pub fn with_finalizer(group: &NodeGroup) -> Vec<String> {
    let mut finalizers = group.finalizers().to_vec();
    if !finalizers.iter().any(|f| f == NODE_GROUP_FINALIZER) {
        finalizers.push(NODE_GROUP_FINALIZER.to_string());
    }
    finalizers
}

/// Finalizer list with ours removed; other finalizers are kept
pub fn without_finalizer(group: &NodeGroup) -> Vec<String> {
    group
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != NODE_GROUP_FINALIZER)
        .cloned()
        .collect()
}
