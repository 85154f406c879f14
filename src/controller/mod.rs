//! Controllers for NodeGroups and EdgeApplications
//!
//! This module contains the NodeGroup membership controller, the
//! EdgeApplication fan-out controller and the status manager that reports
//! rollout state of produced workloads back to their EdgeApplication.

pub mod client;
pub mod edge_application;
mod finalizers;
pub mod merge_patch;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod node_group;
pub mod status_manager;
#[cfg(test)]
pub(crate) mod testing;

use std::time::{Duration, Instant};

use kube::runtime::controller::Action;

use crate::error::Result;
use status_manager::StatusManagerConfig;

pub use client::{KubeClusterClient, NodeGroupClient, WorkloadClient};
pub use edge_application::EdgeApplicationReconciler;
pub use node_group::NodeGroupReconciler;
pub use status_manager::{StatusManager, StatusWatcher};

/// Runtime settings shared by the controllers
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Replace produced objects instead of three-way merging into them
    pub use_server_side_apply: bool,
    /// How often the status manager stops watchers nobody needs
    pub status_gc_interval: Duration,
    /// Bound of the status manager's watch and cancel queues
    pub watch_queue_capacity: usize,
    /// Bound of the channel the status manager uses to re-trigger
    /// EdgeApplication reconciles
    pub trigger_channel_capacity: usize,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            use_server_side_apply: false,
            status_gc_interval: Duration::from_secs(300),
            watch_queue_capacity: 1024,
            trigger_channel_capacity: 1024,
        }
    }
}

impl OperatorConfig {
    pub fn status_manager_config(&self) -> StatusManagerConfig {
        StatusManagerConfig {
            queue_capacity: self.watch_queue_capacity,
            gc_interval: self.status_gc_interval,
        }
    }
}

/// Record duration and outcome of one reconcile
#[allow(unused_variables)]
pub(crate) fn record_reconcile(controller: &str, started: Instant, result: &Result<Action>) {
    #[cfg(feature = "metrics")]
    {
        metrics::observe_reconcile_duration_seconds(controller, started.elapsed().as_secs_f64());
        if let Err(e) = result {
            metrics::inc_reconcile_error(controller, e.metric_kind());
        }
    }
}
