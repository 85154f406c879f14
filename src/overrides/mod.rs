//! Override pipeline for EdgeApplication workload templates
//!
//! Each [`Overrider`] rewrites one aspect of a template for a single target
//! (a node group or a node label selector). The [`OverrideManager`] runs
//! them in a fixed order:
//!
//! 1. [`NameOverrider`]
//! 2. [`ReplicasOverrider`]
//! 3. [`ImageOverrider`]
//! 4. command and args ([`ContainerListOverrider`])
//! 5. [`EnvOverrider`]
//! 6. [`ResourcesOverrider`]
//! 7. [`NodeSelectorOverrider`]
//!
//! Errors from one overrider do not stop the others; they are returned
//! together once the pipeline has run.

mod command_args;
mod env;
mod image;
pub mod image_ref;
mod name;
mod node_selector;
pub mod patch;
mod replicas;
mod resources;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::crd::{Overriders, TargetNodeGroup, TargetNodeLabel};

pub use command_args::{ContainerListField, ContainerListOverrider};
pub use env::EnvOverrider;
pub use image::ImageOverrider;
pub use name::{create_suffix_from_selector, NameOverrider};
pub use node_selector::{required_node_affinity, NodeSelectorOverrider};
pub use replicas::ReplicasOverrider;
pub use resources::ResourcesOverrider;

#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("{overrider}: unsupported kind {kind}")]
    UnsupportedKind {
        overrider: &'static str,
        kind: String,
    },

    #[error("path {0} does not exist or is not a string")]
    InvalidPath(String),

    #[error("invalid image reference {0:?}")]
    InvalidImage(String),

    #[error("failed to apply JSON patch: {0}")]
    Patch(#[from] json_patch::PatchError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{}", join_errors(.0))]
    Aggregate(Vec<OverrideError>),
}

fn join_errors(errors: &[OverrideError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl OverrideError {
    fn aggregate(mut errors: Vec<OverrideError>) -> Result<(), OverrideError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(OverrideError::Aggregate(errors)),
        }
    }
}

/// One target of an EdgeApplication together with its overrides
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverrideInfo {
    pub target_node_group: String,
    pub target_node_label_selector: LabelSelector,
    pub overriders: Overriders,
}

impl OverrideInfo {
    pub fn has_label_selector(&self) -> bool {
        let has_labels = self
            .target_node_label_selector
            .match_labels
            .as_ref()
            .is_some_and(|l| !l.is_empty());
        let has_expressions = self
            .target_node_label_selector
            .match_expressions
            .as_ref()
            .is_some_and(|e| !e.is_empty());
        has_labels || has_expressions
    }

    /// Short description of the target for logs
    pub fn target(&self) -> String {
        if self.has_label_selector() {
            create_suffix_from_selector(&self.target_node_label_selector)
        } else {
            format!("nodegroup/{}", self.target_node_group)
        }
    }
}

impl From<&TargetNodeGroup> for OverrideInfo {
    fn from(target: &TargetNodeGroup) -> Self {
        Self {
            target_node_group: target.name.clone(),
            target_node_label_selector: LabelSelector::default(),
            overriders: target.overriders.clone(),
        }
    }
}

impl From<&TargetNodeLabel> for OverrideInfo {
    fn from(target: &TargetNodeLabel) -> Self {
        Self {
            target_node_group: String::new(),
            target_node_label_selector: target.label_selector.clone(),
            overriders: target.overriders.clone(),
        }
    }
}

/// A single template transformation
pub trait Overrider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrite `obj` for the target described by `info`. On error the
    /// object is left as it was before this overrider ran.
    fn apply_overrides(&self, obj: &mut Value, info: &OverrideInfo) -> Result<(), OverrideError>;
}

/// Ordered list of overriders applied to every expansion
pub struct OverrideManager {
    overriders: Vec<Box<dyn Overrider>>,
}

impl Default for OverrideManager {
    fn default() -> Self {
        Self::new(vec![
            Box::new(NameOverrider),
            Box::new(ReplicasOverrider),
            Box::new(ImageOverrider),
            Box::new(ContainerListOverrider::command()),
            Box::new(ContainerListOverrider::args()),
            Box::new(EnvOverrider),
            Box::new(ResourcesOverrider),
            Box::new(NodeSelectorOverrider),
        ])
    }
}

impl OverrideManager {
    pub fn new(overriders: Vec<Box<dyn Overrider>>) -> Self {
        Self { overriders }
    }

    /// Pipeline that only recomputes produced names
    pub fn name_only() -> Self {
        Self::new(vec![Box::new(NameOverrider)])
    }

    pub fn apply_overrides(&self, obj: &mut Value, info: &OverrideInfo) -> Result<(), OverrideError> {
        let mut errors = Vec::new();
        for overrider in &self.overriders {
            if let Err(e) = overrider.apply_overrides(obj, info) {
                warn!(
                    "{} failed for target {}: {}",
                    overrider.name(),
                    info.target(),
                    e
                );
                errors.push(e);
            }
        }
        OverrideError::aggregate(errors)
    }
}

impl std::fmt::Debug for OverrideManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.overriders.iter().map(|o| o.name()).collect();
        f.debug_struct("OverrideManager")
            .field("overriders", &names)
            .finish()
    }
}
