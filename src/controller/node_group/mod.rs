//! NodeGroup controller
//!
//! Reconciles NodeGroups on their own changes and on any Node change that
//! could affect membership.

mod reconciler;
pub mod selection;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{error, info};

use crate::controller::client::KubeClusterClient;
use crate::crd::NodeGroup;
use crate::error::{Error, Result};

pub use reconciler::NodeGroupReconciler;
pub use selection::node_groups_for_node;

const CONTROLLER_NAME: &str = "nodegroup";

/// Shared state for the controller
pub struct NodeGroupContext {
    pub reconciler: NodeGroupReconciler,
}

/// Main entry point to start the controller
pub async fn run_controller(client: Client) -> Result<()> {
    let node_groups: Api<NodeGroup> = Api::all(client.clone());

    info!("Starting NodeGroup controller");

    // Verify CRD exists
    if let Err(e) = node_groups.list(&Default::default()).await {
        error!("NodeGroup CRD not found. Please install the CRD first: {:?}", e);
        return Err(Error::ConfigError("NodeGroup CRD not installed".to_string()));
    }

    let ctx = Arc::new(NodeGroupContext {
        reconciler: NodeGroupReconciler::new(Arc::new(KubeClusterClient::new(client.clone()))),
    });

    let controller = Controller::new(node_groups, Config::default());
    let store = controller.store();
    controller
        .watches(Api::<Node>::all(client), Config::default(), move |node| {
            node_groups_for_node(&node, &store.state())
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled NodeGroup: {}", obj.0.name),
                Err(e) => error!("NodeGroup reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

async fn reconcile(group: Arc<NodeGroup>, ctx: Arc<NodeGroupContext>) -> Result<Action> {
    let started = Instant::now();
    let result = ctx.reconciler.reconcile(&group.name_any()).await;
    super::record_reconcile(CONTROLLER_NAME, started, &result);
    result
}

fn error_policy(group: Arc<NodeGroup>, error: &Error, _ctx: Arc<NodeGroupContext>) -> Action {
    error!("Reconciliation error for NodeGroup {}: {:?}", group.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
