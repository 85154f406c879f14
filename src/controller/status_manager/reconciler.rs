//! Availability reporting for one resource kind
//!
//! For an owning EdgeApplication, recompute the produced objects of this
//! kind, check whether each is available and fold the result into the
//! EdgeApplication's workload status.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::GroupVersionKind;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::Resource;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, instrument, warn};

use crate::controller::client::WorkloadClient;
use crate::crd::{EdgeApplication, ManifestCondition, ManifestStatus};
use crate::error::Result;
use crate::overrides::OverrideManager;
use crate::template::{
    collect_overrider_bundles, decode_templates, is_override_target, resource_info_of,
    ResourceInfo, TemplateInfo,
};

use super::TriggerSender;

pub struct StatusReconciler {
    gvk: GroupVersionKind,
    client: Arc<dyn WorkloadClient>,
    trigger: TriggerSender,
}

impl StatusReconciler {
    pub fn new(gvk: GroupVersionKind, client: Arc<dyn WorkloadClient>, trigger: TriggerSender) -> Self {
        Self { gvk, client, trigger }
    }

    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    #[instrument(skip(self), fields(kind = %self.gvk.kind))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let Some(app) = self.client.get_edge_application(namespace, name).await? else {
            return Ok(Action::await_change());
        };
        if app.metadata.deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }

        let observed = self.observe(&app).await;

        let mut status = app.status.clone().unwrap_or_default();
        for entry in observed {
            upsert_manifest_status(&mut status.workload_status, entry);
        }
        status.sort_entries();

        if app.status.as_ref() != Some(&status) {
            self.client
                .update_edge_application_status(namespace, name, &status)
                .await?;
            debug!("Updated workload status of {}/{}", namespace, name);
        }

        self.notify(namespace, name);
        Ok(Action::await_change())
    }

    /// Current condition of every object of this kind `app` produces
    async fn observe(&self, app: &EdgeApplication) -> Vec<ManifestStatus> {
        let (templates, _) = decode_templates(app);
        let mut observed = Vec::new();

        for template in templates.iter().filter(|t| t.gvk() == self.gvk) {
            if !is_override_target(&self.gvk) {
                let info = resource_info_of(template);
                let condition = self.available_if_exists(&info).await;
                observed.push(ManifestStatus {
                    identifier: info.identifier(),
                    condition,
                });
                continue;
            }

            let namer = OverrideManager::name_only();
            for bundle in collect_overrider_bundles(app) {
                let mut produced = template.template.clone();
                if let Err(e) = namer.apply_overrides(&mut produced, &bundle) {
                    warn!("Cannot name expansion for {}: {}", bundle.target(), e);
                    continue;
                }
                let info = resource_info_of(&TemplateInfo {
                    ordinal: template.ordinal,
                    template: produced,
                });
                let condition = self.deployment_available(&info).await;
                observed.push(ManifestStatus {
                    identifier: info.identifier(),
                    condition,
                });
            }
        }
        observed
    }

    async fn live(&self, info: &ResourceInfo) -> Option<Value> {
        match self
            .client
            .get_object(&info.gvk(), &info.namespace, &info.name)
            .await
        {
            Ok(live) => live,
            Err(e) => {
                warn!("Failed to read {}: {}", info, e);
                None
            }
        }
    }

    async fn available_if_exists(&self, info: &ResourceInfo) -> ManifestCondition {
        match self.live(info).await {
            Some(_) => ManifestCondition::Available,
            None => ManifestCondition::Processing,
        }
    }

    async fn deployment_available(&self, info: &ResourceInfo) -> ManifestCondition {
        let Some(live) = self.live(info).await else {
            return ManifestCondition::Processing;
        };
        let desired = live.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
        let ready = live
            .pointer("/status/readyReplicas")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if ready == desired {
            ManifestCondition::Available
        } else {
            ManifestCondition::Processing
        }
    }

    /// Ask the EdgeApplication reconciler to run again for this owner
    fn notify(&self, namespace: &str, name: &str) {
        let target = ObjectRef::<EdgeApplication>::new(name).within(namespace);
        match self.trigger.try_send(target) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Trigger channel full, dropping re-sync of {}/{}", namespace, name);
                #[cfg(feature = "metrics")]
                crate::controller::metrics::inc_trigger_dropped();
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Trigger channel closed, not re-syncing {}/{}", namespace, name);
            }
        }
    }
}

/// Fold one observed entry into `entries`.
///
/// An entry with the same ordinal is replaced when its identifier matches
/// or when it is still the placeholder for that ordinal. Otherwise the
/// observation is appended.
pub fn upsert_manifest_status(entries: &mut Vec<ManifestStatus>, observed: ManifestStatus) {
    let ordinal = observed.identifier.ordinal;
    let slot = entries.iter_mut().find(|e| {
        e.identifier.ordinal == ordinal
            && (e.identifier == observed.identifier || e.identifier.is_placeholder())
    });
    match slot {
        Some(entry) => *entry = observed,
        None => entries.push(observed),
    }
}

/// The EdgeApplication controlling an object, if any
pub fn owner_app_of(meta: &ObjectMeta) -> Option<ObjectRef<EdgeApplication>> {
    let api_version = EdgeApplication::api_version(&());
    let kind = EdgeApplication::kind(&());
    let owner = meta
        .owner_references
        .iter()
        .flatten()
        .find(|o| o.controller == Some(true) && o.kind == kind && o.api_version == api_version)?;
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    Some(ObjectRef::new(&owner.name).within(namespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::FakeCluster;
    use crate::crd::{
        EdgeApplicationSpec, EdgeApplicationStatus, ResourceIdentifier, TargetNodeGroup,
        WorkloadScope, WorkloadTemplate,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use serde_json::json;
    use tokio::sync::mpsc;

    const APPS: &str = "apps.kubeedge.io/v1alpha1";

    fn identifier(ordinal: usize, kind: &str, name: &str) -> ResourceIdentifier {
        ResourceIdentifier {
            ordinal,
            group: if kind == "Deployment" { "apps".into() } else { String::new() },
            version: "v1".into(),
            kind: kind.into(),
            namespace: "default".into(),
            name: name.into(),
        }
    }

    fn app(status: Vec<ManifestStatus>) -> EdgeApplication {
        let mut app = EdgeApplication::new(
            "app-1",
            EdgeApplicationSpec {
                workload_template: WorkloadTemplate {
                    manifests: vec![
                        json!({
                            "apiVersion": "apps/v1",
                            "kind": "Deployment",
                            "metadata": {"name": "nginx"},
                            "spec": {"template": {"spec": {"containers": [{"name": "nginx", "image": "nginx"}]}}}
                        }),
                        json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "nginx"}}),
                    ],
                },
                workload_scope: WorkloadScope {
                    target_node_groups: vec![TargetNodeGroup {
                        name: "edge".into(),
                        overriders: Default::default(),
                    }],
                    target_node_labels: vec![],
                },
            },
        );
        app.metadata.namespace = Some("default".into());
        app.status = Some(EdgeApplicationStatus {
            workload_status: status,
        });
        app
    }

    fn reconciler(
        cluster: &Arc<FakeCluster>,
        gvk: GroupVersionKind,
        capacity: usize,
    ) -> (StatusReconciler, mpsc::Receiver<ObjectRef<EdgeApplication>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (StatusReconciler::new(gvk, cluster.clone(), tx), rx)
    }

    fn workload_status(cluster: &FakeCluster) -> Vec<ManifestStatus> {
        cluster
            .edge_application("default", "app-1")
            .status
            .unwrap_or_default()
            .workload_status
    }

    #[test]
    fn test_upsert_replaces_placeholder_then_matches_identifier() {
        let mut entries = vec![ManifestStatus::processing(ResourceIdentifier::placeholder(0))];

        let available = ManifestStatus {
            identifier: identifier(0, "Deployment", "nginx-a"),
            condition: ManifestCondition::Available,
        };
        upsert_manifest_status(&mut entries, available.clone());
        assert_eq!(entries, vec![available.clone()]);

        let other = ManifestStatus::processing(identifier(0, "Deployment", "nginx-b"));
        upsert_manifest_status(&mut entries, other.clone());
        assert_eq!(entries, vec![available, other]);
    }

    #[test]
    fn test_owner_app_requires_controller_reference() {
        let owner = |controller: Option<bool>, kind: &str| OwnerReference {
            api_version: APPS.to_string(),
            kind: kind.to_string(),
            name: "app-1".to_string(),
            uid: "u".to_string(),
            controller,
            block_owner_deletion: None,
        };
        let meta = |refs: Vec<OwnerReference>| ObjectMeta {
            namespace: Some("default".to_string()),
            owner_references: Some(refs),
            ..Default::default()
        };

        assert_eq!(
            owner_app_of(&meta(vec![owner(Some(true), "EdgeApplication")])),
            Some(ObjectRef::new("app-1").within("default"))
        );
        assert_eq!(owner_app_of(&meta(vec![owner(None, "EdgeApplication")])), None);
        assert_eq!(owner_app_of(&meta(vec![owner(Some(true), "ReplicaSet")])), None);
    }

    #[tokio::test]
    async fn test_deployment_becomes_available_when_ready() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.insert(&app(vec![ManifestStatus::processing(identifier(
            0,
            "Deployment",
            "nginx-edge",
        ))]));
        cluster.insert(&json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "nginx-edge", "namespace": "default"},
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 1}
        }));
        let (r, mut rx) = reconciler(&cluster, GroupVersionKind::gvk("apps", "v1", "Deployment"), 4);

        r.reconcile("default", "app-1").await.unwrap();
        assert_eq!(workload_status(&cluster)[0].condition, ManifestCondition::Processing);
        assert_eq!(cluster.status_writes(), 0);

        cluster.modify("apps/v1", "Deployment", "default", "nginx-edge", |d| {
            d["status"]["readyReplicas"] = json!(3);
        });
        r.reconcile("default", "app-1").await.unwrap();

        assert_eq!(
            workload_status(&cluster),
            vec![ManifestStatus {
                identifier: identifier(0, "Deployment", "nginx-edge"),
                condition: ManifestCondition::Available,
            }]
        );
        assert_eq!(cluster.status_writes(), 1);
        assert_eq!(rx.recv().await, Some(ObjectRef::new("app-1").within("default")));
    }

    #[tokio::test]
    async fn test_other_kinds_available_if_they_exist() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.insert(&app(vec![
            ManifestStatus::processing(identifier(0, "Deployment", "nginx-edge")),
            ManifestStatus::processing(identifier(1, "Service", "nginx")),
        ]));
        let (r, _rx) = reconciler(&cluster, GroupVersionKind::gvk("", "v1", "Service"), 4);

        r.reconcile("default", "app-1").await.unwrap();
        assert_eq!(cluster.status_writes(), 0);

        cluster.insert(&json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "nginx", "namespace": "default"}
        }));
        r.reconcile("default", "app-1").await.unwrap();

        let status = workload_status(&cluster);
        assert_eq!(status[0].condition, ManifestCondition::Processing);
        assert_eq!(status[1].condition, ManifestCondition::Available);
    }

    #[tokio::test]
    async fn test_full_trigger_channel_does_not_fail() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.insert(&app(vec![]));
        let (r, _rx) = reconciler(&cluster, GroupVersionKind::gvk("", "v1", "Service"), 1);

        r.reconcile("default", "app-1").await.unwrap();
        r.reconcile("default", "app-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_app_is_noop() {
        let cluster = Arc::new(FakeCluster::new());
        let (r, mut rx) = reconciler(&cluster, GroupVersionKind::gvk("", "v1", "Service"), 1);
        r.reconcile("default", "gone").await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
