//! Override specifications attached to EdgeApplication targets
//!
//! Each target node group or node label selector carries one [`Overriders`]
//! value describing how the workload templates are rewritten for it.

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Overriders {
    /// Replica count for produced Deployments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_overriders: Vec<ImageOverrider>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command_overriders: Vec<CommandArgsOverrider>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args_overriders: Vec<CommandArgsOverrider>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_overriders: Vec<EnvOverrider>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_overriders: Vec<ResourcesOverrider>,
}

/// Operators supported by the list and image overriders
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OverriderOperator {
    Add,
    Remove,
    Replace,
}

impl std::fmt::Display for OverriderOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverriderOperator::Add => write!(f, "add"),
            OverriderOperator::Remove => write!(f, "remove"),
            OverriderOperator::Replace => write!(f, "replace"),
        }
    }
}

/// Part of an image reference an [`ImageOverrider`] acts on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ImageComponent {
    Registry,
    Repository,
    Tag,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageOverrider {
    /// Restricts the override to a single image field. Without a predicate
    /// every container image is overridden.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<ImagePredicate>,

    pub component: ImageComponent,

    pub operator: OverriderOperator,

    #[serde(default)]
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImagePredicate {
    /// JSON pointer to the image field, e.g. `/spec/template/spec/containers/0/image`
    pub path: String,
}

/// Shared shape of the command and args overriders
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandArgsOverrider {
    pub container_name: String,
    pub operator: OverriderOperator,
    #[serde(default)]
    pub value: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvOverrider {
    pub container_name: String,
    pub operator: OverriderOperator,
    #[serde(default)]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub value: Vec<EnvVar>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesOverrider {
    pub container_name: String,
    #[serde(default)]
    #[schemars(with = "serde_json::Value")]
    pub value: ResourceRequirements,
}
