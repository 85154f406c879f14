//! EdgeApplication custom resource
//!
//! An EdgeApplication embeds workload manifests and fans them out to node
//! groups or node label selectors, applying per-target overrides.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::overriders::Overriders;

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "apps.kubeedge.io",
    version = "v1alpha1",
    kind = "EdgeApplication",
    namespaced,
    status = "EdgeApplicationStatus",
    shortname = "eapp",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EdgeApplicationSpec {
    #[serde(default)]
    pub workload_template: WorkloadTemplate,

    #[serde(default)]
    pub workload_scope: WorkloadScope,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadTemplate {
    /// Embedded resource manifests. Each entry is a full Kubernetes object.
    #[serde(default)]
    #[schemars(schema_with = "embedded_manifests_schema")]
    pub manifests: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadScope {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_node_groups: Vec<TargetNodeGroup>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_node_labels: Vec<TargetNodeLabel>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetNodeGroup {
    pub name: String,
    #[serde(default)]
    pub overriders: Overriders,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetNodeLabel {
    #[schemars(with = "serde_json::Value")]
    pub label_selector: LabelSelector,
    #[serde(default)]
    pub overriders: Overriders,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EdgeApplicationStatus {
    /// Rollout state of every produced workload, sorted by (ordinal, name)
    #[serde(default)]
    pub workload_status: Vec<ManifestStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStatus {
    pub identifier: ResourceIdentifier,
    #[serde(rename = "conditions")]
    pub condition: ManifestCondition,
}

/// Identifies one produced object and the manifest it came from
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentifier {
    pub ordinal: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ManifestCondition {
    #[default]
    Processing,
    Available,
}

impl ResourceIdentifier {
    /// Placeholder identifier for a manifest slot that produced nothing yet
    pub fn placeholder(ordinal: usize) -> Self {
        Self {
            ordinal,
            ..Default::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.group.is_empty()
            && self.version.is_empty()
            && self.kind.is_empty()
            && self.namespace.is_empty()
            && self.name.is_empty()
    }
}

impl EdgeApplicationStatus {
    /// Order entries by (ordinal, name)
    pub fn sort_entries(&mut self) {
        self.workload_status.sort_by(|a, b| {
            (a.identifier.ordinal, &a.identifier.name)
                .cmp(&(b.identifier.ordinal, &b.identifier.name))
        });
    }
}

impl ManifestStatus {
    pub fn processing(identifier: ResourceIdentifier) -> Self {
        Self {
            identifier,
            condition: ManifestCondition::Processing,
        }
    }
}

fn embedded_manifests_schema(_: &mut SchemaGenerator) -> Schema {
    let mut item = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    item.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    item.extensions.insert(
        "x-kubernetes-embedded-resource".to_string(),
        serde_json::Value::Bool(true),
    );

    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(Schema::Object(item).into()),
            ..Default::default()
        })),
        ..Default::default()
    })
}
