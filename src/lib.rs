//! KubeEdge apps: NodeGroup and EdgeApplication controllers
//!
//! This crate groups edge nodes into NodeGroups and fans EdgeApplication
//! workload templates out to those groups, rewriting each copy for its
//! target through a pipeline of overriders.

pub mod controller;
pub mod crd;
pub mod error;
pub mod overrides;
pub mod telemetry;
pub mod template;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
