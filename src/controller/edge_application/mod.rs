//! EdgeApplication controller
//!
//! Reconciles EdgeApplications on their own changes and whenever a status
//! watcher asks for a re-sync through the trigger channel.

mod apply;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
mod status;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher::Config,
    },
    ResourceExt,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::controller::client::KubeClusterClient;
use crate::controller::status_manager::{DynamicStatusControllers, StatusManager};
use crate::controller::OperatorConfig;
use crate::crd::EdgeApplication;
use crate::error::{Error, Result};

pub use apply::{apply_template, set_controller_owner, ApplyOutcome};
pub use reconciler::{EdgeApplicationReconciler, Expansion};
pub use status::status_skeleton;

use reconciler::CONTROLLER_NAME;

/// Shared state for the controller
pub struct EdgeApplicationContext {
    pub reconciler: EdgeApplicationReconciler,
}

/// Start the status manager and run the EdgeApplication controller
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let apps: Api<EdgeApplication> = Api::all(client.clone());

    info!("Starting EdgeApplication controller");

    // Verify CRD exists
    if let Err(e) = apps.list(&Default::default()).await {
        error!("EdgeApplication CRD not found. Please install the CRD first: {:?}", e);
        return Err(Error::ConfigError(
            "EdgeApplication CRD not installed".to_string(),
        ));
    }

    let workload = Arc::new(KubeClusterClient::new(client.clone()));
    let (trigger_tx, trigger_rx) = mpsc::channel(config.trigger_channel_capacity);

    let kind_watcher = Arc::new(DynamicStatusControllers::new(
        client.clone(),
        workload.clone(),
        shutdown.clone(),
    ));
    let mut status_manager = StatusManager::new(
        workload.clone(),
        kind_watcher,
        config.status_manager_config(),
    );
    status_manager.set_trigger_channel(trigger_tx);
    let status_manager = Arc::new(status_manager);
    status_manager.start(shutdown.clone()).await?;

    let ctx = Arc::new(EdgeApplicationContext {
        reconciler: EdgeApplicationReconciler::new(
            workload,
            status_manager,
            config.use_server_side_apply,
        ),
    });

    let triggers = futures::stream::unfold(trigger_rx, |mut rx| async move {
        rx.recv().await.map(|target: ObjectRef<EdgeApplication>| (target, rx))
    });

    Controller::new(apps, Config::default())
        .reconcile_on(triggers)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled EdgeApplication: {}", obj.0),
                Err(e) => error!("EdgeApplication reconcile error: {:?}", e),
            }
        })
        .await;

    shutdown.cancel();
    Ok(())
}

async fn reconcile(app: Arc<EdgeApplication>, ctx: Arc<EdgeApplicationContext>) -> Result<Action> {
    let started = Instant::now();
    let namespace = app.namespace().unwrap_or_default();
    let result = ctx.reconciler.reconcile(&namespace, &app.name_any()).await;
    super::record_reconcile(CONTROLLER_NAME, started, &result);
    result
}

fn error_policy(app: Arc<EdgeApplication>, error: &Error, _ctx: Arc<EdgeApplicationContext>) -> Action {
    error!(
        "Reconciliation error for EdgeApplication {}/{}: {:?}",
        app.namespace().unwrap_or_default(),
        app.name_any(),
        error
    );

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
