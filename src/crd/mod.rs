//! Custom Resource Definitions for KubeEdge apps
//!
//! This module defines the NodeGroup and EdgeApplication CRDs served under
//! the `apps.kubeedge.io` group.

mod edge_application;
mod node_group;
pub mod overriders;
pub mod well_known;


pub use edge_application::{
    EdgeApplication, EdgeApplicationSpec, EdgeApplicationStatus, ManifestCondition,
    ManifestStatus, ResourceIdentifier, TargetNodeGroup, TargetNodeLabel, WorkloadScope,
    WorkloadTemplate,
};
pub use node_group::{
    NodeGroup, NodeGroupSpec, NodeGroupStatus, NodeStatus, ReadyStatus, SelectionStatus,
};
pub use overriders::{
    CommandArgsOverrider, EnvOverrider, ImageComponent, ImageOverrider, ImagePredicate,
    OverriderOperator, Overriders, ResourcesOverrider,
};
