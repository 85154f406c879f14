//! Label, annotation and finalizer keys shared with users and other tooling

/// Label stamped on member nodes and used as the node selector key of
/// produced Deployments
pub const LABEL_BELONGING_TO: &str = "apps.kubeedge.io/belonging-to";

/// Finalizer held by every NodeGroup until its members are released
pub const NODE_GROUP_FINALIZER: &str = "apps.kubeedge.io/nodegroup-controller";

/// Annotation on produced objects holding the JSON of the last written template
pub const ANNOTATION_LAST_APPLIED_TEMPLATE: &str = "apps.kubeedge.io/last-applied-template";

/// Annotation on an EdgeApplication listing the resources it produced last
pub const ANNOTATION_LAST_CONTAINED_RESOURCES: &str = "apps.kubeedge.io/last-contained-resources";

/// Annotation on produced Services selecting group-ranged topology routing
pub const ANNOTATION_SERVICE_TOPOLOGY: &str = "apps.kubeedge.io/service-topology";

pub const SERVICE_TOPOLOGY_RANGE_NODE_GROUP: &str = "range-nodegroup";
