//! Per-kind status controllers backed by the API server

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use kube::{
    api::{Api, DynamicObject},
    client::Client,
    core::GroupVersionKind,
    discovery,
    runtime::{
        controller::{self, Action, Controller},
        reflector::{self, Store},
        watcher, WatchStreamExt,
    },
    ResourceExt,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::controller::client::WorkloadClient;
use crate::crd::EdgeApplication;
use crate::error::{Error, Result};

use super::reconciler::{owner_app_of, StatusReconciler};
use super::{KindWatcher, TriggerSender};

const CONTROLLER_NAME: &str = "status";

/// Runs one single-worker controller per watched kind.
///
/// Every controller shares a reflector store of EdgeApplications and
/// reconciles the EdgeApplication that owns the changed object.
pub struct DynamicStatusControllers {
    client: Client,
    workload: Arc<dyn WorkloadClient>,
    apps: Store<EdgeApplication>,
}

impl DynamicStatusControllers {
    /// Start the shared EdgeApplication reflector; it stops with `shutdown`
    pub fn new(client: Client, workload: Arc<dyn WorkloadClient>, shutdown: CancellationToken) -> Self {
        let (apps, writer) = reflector::store();
        let app_reflector = reflector::reflector(
            writer,
            watcher(Api::<EdgeApplication>::all(client.clone()), watcher::Config::default()),
        )
        .default_backoff()
        .touched_objects();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = app_reflector.for_each(|_| futures::future::ready(())) => {}
            }
            debug!("EdgeApplication reflector stopped");
        });

        Self {
            client,
            workload,
            apps,
        }
    }
}

#[async_trait]
impl KindWatcher for DynamicStatusControllers {
    async fn start(
        &self,
        gvk: GroupVersionKind,
        token: CancellationToken,
        trigger: TriggerSender,
    ) -> Result<()> {
        let (resource, _) = discovery::pinned_kind(&self.client, &gvk).await?;
        let objects: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let ctx = Arc::new(StatusReconciler::new(
            gvk.clone(),
            self.workload.clone(),
            trigger,
        ));

        let kind = gvk.kind.clone();
        let controller = Controller::for_stream(
            futures::stream::pending::<std::result::Result<EdgeApplication, watcher::Error>>(),
            self.apps.clone(),
        )
        .watches_with(objects, resource, watcher::Config::default(), |obj| {
            owner_app_of(&obj.metadata)
        })
        .with_config(controller::Config::default().concurrency(1))
        .run(reconcile, error_policy, ctx)
        .for_each(move |res| {
            if let Err(e) = res {
                debug!("Status reconcile for {} failed: {:?}", kind, e);
            }
            futures::future::ready(())
        });

        let handle = tokio::spawn(controller);
        tokio::spawn(async move {
            token.cancelled().await;
            handle.abort();
            info!(
                "Stopped status controller for {}/{} {}",
                gvk.group, gvk.version, gvk.kind
            );
        });
        Ok(())
    }
}

async fn reconcile(app: Arc<EdgeApplication>, ctx: Arc<StatusReconciler>) -> Result<Action> {
    let started = Instant::now();
    let namespace = app.namespace().unwrap_or_default();
    let result = ctx.reconcile(&namespace, &app.name_any()).await;
    crate::controller::record_reconcile(CONTROLLER_NAME, started, &result);
    result
}

fn error_policy(app: Arc<EdgeApplication>, error: &Error, ctx: Arc<StatusReconciler>) -> Action {
    error!(
        "Status reconcile error for {} of {}: {:?}",
        ctx.gvk().kind,
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
