//! Status Manager
//!
//! Keeps one status watcher per resource kind produced by any
//! EdgeApplication. Watchers are requested through a bounded queue as the
//! EdgeApplication reconciler applies objects, and are stopped through a
//! second queue or by the periodic sweep once no EdgeApplication produces
//! that kind anymore.
//!
//! Watchers report availability back into EdgeApplication status and nudge
//! the EdgeApplication reconciler through the trigger channel.

mod reconciler;
mod watchers;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::core::GroupVersionKind;
use kube::runtime::reflector::ObjectRef;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::client::WorkloadClient;
use crate::crd::EdgeApplication;
use crate::error::{Error, Result};
use crate::template::{decode_templates, ResourceInfo};

pub use reconciler::{owner_app_of, upsert_manifest_status, StatusReconciler};
pub use watchers::DynamicStatusControllers;

/// Sender half of the EdgeApplication re-sync channel
pub type TriggerSender = mpsc::Sender<ObjectRef<EdgeApplication>>;

/// Starts a status watcher for one kind.
///
/// The watcher must stop once `token` is cancelled.
#[async_trait]
pub trait KindWatcher: Send + Sync {
    async fn start(
        &self,
        gvk: GroupVersionKind,
        token: CancellationToken,
        trigger: TriggerSender,
    ) -> Result<()>;
}

/// Receives the kinds of objects the EdgeApplication reconciler applied
pub trait StatusWatcher: Send + Sync {
    fn watch_status(&self, info: &ResourceInfo) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct StatusManagerConfig {
    /// Bound of both the watch and the cancel queue
    pub queue_capacity: usize,
    /// Period of the unused watcher sweep
    pub gc_interval: Duration,
}

impl Default for StatusManagerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            gc_interval: Duration::from_secs(300),
        }
    }
}

struct Queues {
    watch: mpsc::Receiver<GroupVersionKind>,
    cancel: mpsc::Receiver<GroupVersionKind>,
}

pub struct StatusManager {
    client: Arc<dyn WorkloadClient>,
    kind_watcher: Arc<dyn KindWatcher>,
    gc_interval: Duration,
    watch_tx: mpsc::Sender<GroupVersionKind>,
    cancel_tx: mpsc::Sender<GroupVersionKind>,
    queues: Mutex<Option<Queues>>,
    trigger: Option<TriggerSender>,
    watching: Mutex<HashMap<GroupVersionKind, CancellationToken>>,
}

impl StatusManager {
    pub fn new(
        client: Arc<dyn WorkloadClient>,
        kind_watcher: Arc<dyn KindWatcher>,
        config: StatusManagerConfig,
    ) -> Self {
        let (watch_tx, watch_rx) = mpsc::channel(config.queue_capacity);
        let (cancel_tx, cancel_rx) = mpsc::channel(config.queue_capacity);
        Self {
            client,
            kind_watcher,
            gc_interval: config.gc_interval,
            watch_tx,
            cancel_tx,
            queues: Mutex::new(Some(Queues {
                watch: watch_rx,
                cancel: cancel_rx,
            })),
            trigger: None,
            watching: Mutex::new(HashMap::new()),
        }
    }

    /// Channel on which watchers signal the EdgeApplication reconciler
    pub fn set_trigger_channel(&mut self, trigger: TriggerSender) {
        self.trigger = Some(trigger);
    }

    /// Request a watcher for the kind of `info`; never blocks
    pub fn watch_status(&self, info: &ResourceInfo) -> Result<()> {
        enqueue(&self.watch_tx, info.gvk(), "watch")
    }

    /// Request the watcher for the kind of `info` to stop; never blocks
    pub fn cancel_watch(&self, info: &ResourceInfo) -> Result<()> {
        enqueue(&self.cancel_tx, info.gvk(), "cancel")
    }

    /// Spawn the watch worker, the cancel worker and the sweep loop.
    ///
    /// Fails when no trigger channel was set or when already started.
    pub async fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let trigger = self.trigger.clone().ok_or_else(|| {
            Error::ConfigError("status manager started without a trigger channel".to_string())
        })?;
        let queues = self
            .queues
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::ConfigError("status manager already started".to_string()))?;

        tokio::spawn(
            self.clone()
                .run_watch_worker(queues.watch, trigger, shutdown.clone()),
        );
        tokio::spawn(self.clone().run_cancel_worker(queues.cancel, shutdown.clone()));
        tokio::spawn(self.clone().run_gc_loop(shutdown));

        info!("Status manager started");
        Ok(())
    }

    /// Kinds that currently have a watcher
    pub async fn watched_kinds(&self) -> Vec<GroupVersionKind> {
        self.watching.lock().await.keys().cloned().collect()
    }

    async fn run_watch_worker(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<GroupVersionKind>,
        trigger: TriggerSender,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = queue.recv() => match next {
                    Some(gvk) => self.start_watching(gvk, &trigger, &shutdown).await,
                    None => break,
                },
            }
        }
        queue.close();
        debug!("Status watch worker stopped");
    }

    async fn start_watching(
        &self,
        gvk: GroupVersionKind,
        trigger: &TriggerSender,
        shutdown: &CancellationToken,
    ) {
        let mut watching = self.watching.lock().await;
        if watching.contains_key(&gvk) {
            return;
        }

        let token = shutdown.child_token();
        match self
            .kind_watcher
            .start(gvk.clone(), token.clone(), trigger.clone())
            .await
        {
            Ok(()) => {
                info!("Watching status of {}/{} {}", gvk.group, gvk.version, gvk.kind);
                watching.insert(gvk, token);
                record_watchers(watching.len());
            }
            Err(e) => error!(
                "Failed to start status watcher for {}/{} {}: {}",
                gvk.group, gvk.version, gvk.kind, e
            ),
        }
    }

    async fn run_cancel_worker(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<GroupVersionKind>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = queue.recv() => match next {
                    Some(gvk) => self.stop_watching(&gvk).await,
                    None => break,
                },
            }
        }
        queue.close();

        let mut watching = self.watching.lock().await;
        for (_, token) in watching.drain() {
            token.cancel();
        }
        record_watchers(0);
        debug!("Status cancel worker stopped, all watchers cancelled");
    }

    async fn stop_watching(&self, gvk: &GroupVersionKind) {
        let mut watching = self.watching.lock().await;
        if let Some(token) = watching.remove(gvk) {
            token.cancel();
            info!(
                "Stopped watching status of {}/{} {}",
                gvk.group, gvk.version, gvk.kind
            );
            record_watchers(watching.len());
        }
    }

    async fn run_gc_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.gc_interval);
        // the first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.collect_unused_watchers().await {
                        warn!("Status watcher sweep failed: {}", e);
                    }
                }
            }
        }
    }

    /// Stop watchers of kinds no EdgeApplication produces anymore.
    ///
    /// Returns the kinds that were stopped.
    pub async fn collect_unused_watchers(&self) -> Result<Vec<GroupVersionKind>> {
        let mut used = HashSet::new();
        for app in self.client.list_edge_applications().await? {
            let (templates, _) = decode_templates(&app);
            used.extend(templates.iter().map(|t| t.gvk()));
        }

        let unused: Vec<GroupVersionKind> = self
            .watching
            .lock()
            .await
            .keys()
            .filter(|gvk| !used.contains(*gvk))
            .cloned()
            .collect();
        for gvk in &unused {
            self.stop_watching(gvk).await;
        }
        Ok(unused)
    }
}

impl StatusWatcher for StatusManager {
    fn watch_status(&self, info: &ResourceInfo) -> Result<()> {
        StatusManager::watch_status(self, info)
    }
}

fn enqueue(
    queue: &mpsc::Sender<GroupVersionKind>,
    gvk: GroupVersionKind,
    what: &str,
) -> Result<()> {
    queue.try_send(gvk).map_err(|e| match e {
        TrySendError::Full(gvk) => Error::QueueError(format!(
            "{what} queue is full, dropping {}/{} {}",
            gvk.group, gvk.version, gvk.kind
        )),
        TrySendError::Closed(_) => Error::QueueError(format!("{what} queue is closed")),
    })
}

fn record_watchers(_count: usize) {
    #[cfg(feature = "metrics")]
    crate::controller::metrics::set_status_watchers(_count);
}
