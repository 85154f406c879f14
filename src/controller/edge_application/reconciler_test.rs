//! Tests for the EdgeApplication reconciler
//!
//! These run the reconciler against the in-memory cluster and cover:
//! - Fan-out to node groups and label selectors with overrides applied
//! - Status skeletons and availability reported by the status reconciler
//! - Garbage collection when the template set shrinks
//! - Idempotence of repeated reconciles
//! - Adoption, three-way merge and recreation of deleted children

#[cfg(test)]
mod tests {
    use super::super::reconciler::*;
    use crate::controller::status_manager::{StatusReconciler, StatusWatcher};
    use crate::controller::testing::FakeCluster;
    use crate::crd::well_known::{
        ANNOTATION_LAST_CONTAINED_RESOURCES, ANNOTATION_SERVICE_TOPOLOGY, LABEL_BELONGING_TO,
    };
    use crate::crd::{
        EdgeApplication, EdgeApplicationSpec, ManifestCondition, ResourceIdentifier,
        TargetNodeGroup, TargetNodeLabel, WorkloadScope, WorkloadTemplate,
    };
    use crate::error::{Error, Result};
    use crate::template::{decode_templates, ResourceInfo};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use kube::core::GroupVersionKind;
    use kube::ResourceExt;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    const NS: &str = "default";

    #[derive(Default)]
    struct RecordingWatcher {
        watched: Mutex<Vec<ResourceInfo>>,
    }

    impl StatusWatcher for RecordingWatcher {
        fn watch_status(&self, info: &ResourceInfo) -> Result<()> {
            self.watched.lock().unwrap().push(info.clone());
            Ok(())
        }
    }

    fn nginx_deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "nginx"},
            "spec": {
                "replicas": 1,
                "selector": {"matchLabels": {"app": "nginx"}},
                "template": {
                    "metadata": {"labels": {"app": "nginx"}},
                    "spec": {"containers": [{"name": "nginx", "image": "nginx:1.14.2"}]}
                }
            }
        })
    }

    fn config_map(name: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name},
            "data": {"key": name}
        })
    }

    fn edge_group(overriders: Value) -> TargetNodeGroup {
        TargetNodeGroup {
            name: "edge".to_string(),
            overriders: serde_json::from_value(overriders).unwrap(),
        }
    }

    fn app(manifests: Vec<Value>, scope: WorkloadScope) -> EdgeApplication {
        let mut app = EdgeApplication::new(
            "app-1",
            EdgeApplicationSpec {
                workload_template: WorkloadTemplate { manifests },
                workload_scope: scope,
            },
        );
        app.metadata.namespace = Some(NS.to_string());
        app
    }

    fn fan_out_app() -> EdgeApplication {
        app(
            vec![nginx_deployment()],
            WorkloadScope {
                target_node_groups: vec![edge_group(json!({
                    "replicas": 3,
                    "imageOverriders": [{"component": "Tag", "operator": "replace", "value": "1.15.0"}]
                }))],
                ..Default::default()
            },
        )
    }

    fn setup(app: &EdgeApplication) -> (Arc<FakeCluster>, Arc<RecordingWatcher>, EdgeApplicationReconciler) {
        let cluster = Arc::new(FakeCluster::new());
        cluster.insert(app);
        let watcher = Arc::new(RecordingWatcher::default());
        let reconciler = EdgeApplicationReconciler::new(cluster.clone(), watcher.clone(), false);
        (cluster, watcher, reconciler)
    }

    fn deployment(cluster: &FakeCluster, name: &str) -> Option<Value> {
        cluster.get_raw("apps/v1", "Deployment", NS, name)
    }

    fn set_manifests(cluster: &FakeCluster, manifests: Vec<Value>) {
        cluster.modify(
            "apps.kubeedge.io/v1alpha1",
            "EdgeApplication",
            NS,
            "app-1",
            |obj| obj["spec"]["workloadTemplate"]["manifests"] = json!(manifests),
        );
    }

    fn contained(cluster: &FakeCluster) -> Vec<ResourceInfo> {
        let app = cluster.edge_application(NS, "app-1");
        let raw = app.annotations().get(ANNOTATION_LAST_CONTAINED_RESOURCES).unwrap();
        serde_json::from_str(raw).unwrap()
    }

    fn deployment_gvk() -> GroupVersionKind {
        GroupVersionKind::gvk("apps", "v1", "Deployment")
    }

    #[tokio::test]
    async fn test_single_group_fan_out() {
        let (cluster, watcher, reconciler) = setup(&fan_out_app());

        reconciler.reconcile(NS, "app-1").await.unwrap();

        let produced = deployment(&cluster, "nginx-edge").expect("nginx-edge created");
        assert_eq!(produced["spec"]["replicas"], 3);
        assert_eq!(
            produced["spec"]["template"]["spec"]["containers"][0]["image"],
            "nginx:1.15.0"
        );
        assert_eq!(
            produced["spec"]["template"]["spec"]["nodeSelector"][LABEL_BELONGING_TO],
            "edge"
        );
        assert!(deployment(&cluster, "nginx").is_none());

        let status = cluster.edge_application(NS, "app-1").status.unwrap();
        assert_eq!(status.workload_status.len(), 1);
        assert_eq!(status.workload_status[0].identifier.ordinal, 0);
        assert_eq!(status.workload_status[0].identifier.name, "nginx-edge");
        assert_eq!(status.workload_status[0].condition, ManifestCondition::Processing);

        let watched = watcher.watched.lock().unwrap();
        assert_eq!(watched.len(), 1);
        assert_eq!(watched[0].name, "nginx-edge");
    }

    #[tokio::test]
    async fn test_status_becomes_available_when_replicas_ready() {
        let (cluster, _, reconciler) = setup(&fan_out_app());
        reconciler.reconcile(NS, "app-1").await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let status_reconciler = StatusReconciler::new(deployment_gvk(), cluster.clone(), tx);

        status_reconciler.reconcile(NS, "app-1").await.unwrap();
        let status = cluster.edge_application(NS, "app-1").status.unwrap();
        assert_eq!(status.workload_status[0].condition, ManifestCondition::Processing);
        assert!(rx.try_recv().is_ok());

        cluster.modify("apps/v1", "Deployment", NS, "nginx-edge", |obj| {
            obj["status"] = json!({"readyReplicas": 3});
        });
        status_reconciler.reconcile(NS, "app-1").await.unwrap();

        let status = cluster.edge_application(NS, "app-1").status.unwrap();
        assert_eq!(status.workload_status.len(), 1);
        assert_eq!(status.workload_status[0].condition, ManifestCondition::Available);
    }

    #[tokio::test]
    async fn test_children_are_controlled_by_the_application() {
        let edge_app = app(
            vec![nginx_deployment(), config_map("settings")],
            WorkloadScope {
                target_node_groups: vec![edge_group(json!({}))],
                ..Default::default()
            },
        );
        let (cluster, _, reconciler) = setup(&edge_app);
        let uid = cluster.edge_application(NS, "app-1").uid().unwrap();

        reconciler.reconcile(NS, "app-1").await.unwrap();

        for child in [
            deployment(&cluster, "nginx-edge").unwrap(),
            cluster.get_raw("v1", "ConfigMap", NS, "settings").unwrap(),
        ] {
            let refs = child["metadata"]["ownerReferences"].as_array().unwrap();
            let controllers: Vec<&Value> =
                refs.iter().filter(|r| r["controller"] == true).collect();
            assert_eq!(controllers.len(), 1);
            assert_eq!(controllers[0]["kind"], "EdgeApplication");
            assert_eq!(controllers[0]["name"], "app-1");
            assert_eq!(controllers[0]["uid"], uid.as_str());
        }
    }

    #[tokio::test]
    async fn test_last_contained_resources_lists_produced_objects() {
        let edge_app = app(
            vec![config_map("b"), nginx_deployment(), config_map("a")],
            WorkloadScope {
                target_node_groups: vec![edge_group(json!({}))],
                ..Default::default()
            },
        );
        let (cluster, _, reconciler) = setup(&edge_app);

        reconciler.reconcile(NS, "app-1").await.unwrap();

        let names: Vec<String> = contained(&cluster).into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["b", "nginx-edge", "a"]);
    }

    #[tokio::test]
    async fn test_second_reconcile_writes_nothing() {
        let (cluster, _, reconciler) = setup(&fan_out_app());
        reconciler.reconcile(NS, "app-1").await.unwrap();
        assert!(!cluster.writes().is_empty());

        cluster.clear_writes();
        reconciler.reconcile(NS, "app-1").await.unwrap();

        assert!(cluster.writes().is_empty(), "unexpected writes: {:?}", cluster.writes());
        assert_eq!(cluster.status_writes(), 0);
    }

    #[tokio::test]
    async fn test_shrinking_template_set_deletes_dropped_objects() {
        let edge_app = app(vec![config_map("a"), config_map("b")], WorkloadScope::default());
        let (cluster, _, reconciler) = setup(&edge_app);
        reconciler.reconcile(NS, "app-1").await.unwrap();
        assert!(cluster.get_raw("v1", "ConfigMap", NS, "b").is_some());

        set_manifests(&cluster, vec![config_map("a")]);
        reconciler.reconcile(NS, "app-1").await.unwrap();

        assert!(cluster.get_raw("v1", "ConfigMap", NS, "a").is_some());
        assert!(cluster.get_raw("v1", "ConfigMap", NS, "b").is_none());
        assert!(cluster.writes().contains(&"delete ConfigMap/b".to_string()));

        let names: Vec<String> = contained(&cluster).into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["a"]);

        let status = cluster.edge_application(NS, "app-1").status.unwrap();
        let names: Vec<&str> = status
            .workload_status
            .iter()
            .map(|e| e.identifier.name.as_str())
            .collect();
        assert_eq!(names, vec!["a"]);
    }

    #[tokio::test]
    async fn test_equivalent_label_selectors_share_a_name() {
        let selector = |pairs: &[(&str, &str)]| TargetNodeLabel {
            label_selector: LabelSelector {
                match_labels: Some(
                    pairs
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            overriders: Default::default(),
        };
        let edge_app = app(
            vec![nginx_deployment()],
            WorkloadScope {
                target_node_labels: vec![
                    selector(&[("zone", "e"), ("env", "p")]),
                    selector(&[("env", "p"), ("zone", "e")]),
                ],
                ..Default::default()
            },
        );
        let (_, _, reconciler) = setup(&edge_app);

        let (templates, decoded) = decode_templates(&edge_app);
        decoded.unwrap();
        let mut errors = Vec::new();
        let expansions = reconciler.expand(&edge_app, &templates, &mut errors);

        assert!(errors.is_empty());
        assert_eq!(expansions.len(), 2);
        assert_eq!(expansions[0].info.name, expansions[1].info.name);
        assert!(expansions[0].info.name.starts_with("nginx-ls-"));
    }

    #[tokio::test]
    async fn test_services_get_topology_annotation() {
        let service = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web"},
            "spec": {"ports": [{"port": 80}]}
        });
        let (cluster, _, reconciler) = setup(&app(vec![service], WorkloadScope::default()));

        reconciler.reconcile(NS, "app-1").await.unwrap();

        let produced = cluster.get_raw("v1", "Service", NS, "web").unwrap();
        assert_eq!(
            produced["metadata"]["annotations"][ANNOTATION_SERVICE_TOPOLOGY],
            "range-nodegroup"
        );
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_placeholder_and_applies_the_rest() {
        let edge_app = app(
            vec![config_map("a"), json!("kind: ConfigMap\nmetadata:\n  name: broken\n")],
            WorkloadScope::default(),
        );
        let (cluster, _, reconciler) = setup(&edge_app);

        let err = reconciler.reconcile(NS, "app-1").await.unwrap_err();
        assert!(matches!(err, Error::ParseError { ordinal: 1, .. }));

        assert!(cluster.get_raw("v1", "ConfigMap", NS, "a").is_some());
        let status = cluster.edge_application(NS, "app-1").status.unwrap();
        let ids: Vec<&ResourceIdentifier> =
            status.workload_status.iter().map(|e| &e.identifier).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].name, "a");
        assert_eq!(ids[1], &ResourceIdentifier::placeholder(1));
    }

    #[tokio::test]
    async fn test_deployment_without_targets_gets_no_status_entry() {
        let edge_app = app(vec![nginx_deployment()], WorkloadScope::default());
        let (cluster, watcher, reconciler) = setup(&edge_app);

        reconciler.reconcile(NS, "app-1").await.unwrap();

        assert!(deployment(&cluster, "nginx").is_none());
        assert!(watcher.watched.lock().unwrap().is_empty());
        let entries = cluster
            .edge_application(NS, "app-1")
            .status
            .map(|s| s.workload_status)
            .unwrap_or_default();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_failed_expansion_skips_only_that_target() {
        let broken = TargetNodeGroup {
            name: "broken".to_string(),
            overriders: serde_json::from_value(json!({
                "imageOverriders": [{
                    "predicate": {"path": "/spec/template/spec/containers/5/image"},
                    "component": "Tag", "operator": "replace", "value": "x"
                }]
            }))
            .unwrap(),
        };
        let edge_app = app(
            vec![nginx_deployment()],
            WorkloadScope {
                target_node_groups: vec![edge_group(json!({})), broken],
                ..Default::default()
            },
        );
        let (cluster, _, reconciler) = setup(&edge_app);

        let err = reconciler.reconcile(NS, "app-1").await.unwrap_err();
        assert!(matches!(err, Error::OverrideError(_)));

        assert!(deployment(&cluster, "nginx-edge").is_some());
        assert!(deployment(&cluster, "nginx-broken").is_none());
        let status = cluster.edge_application(NS, "app-1").status.unwrap();
        assert_eq!(status.workload_status.len(), 1);
        assert_eq!(status.workload_status[0].identifier.name, "nginx-edge");
    }

    #[tokio::test]
    async fn test_unowned_object_is_adopted() {
        let (cluster, _, reconciler) = setup(&fan_out_app());
        cluster.insert(&json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "nginx-edge", "namespace": NS},
            "spec": {"replicas": 7}
        }));

        reconciler.reconcile(NS, "app-1").await.unwrap();

        assert!(cluster.writes().contains(&"update Deployment/nginx-edge".to_string()));
        assert_eq!(deployment(&cluster, "nginx-edge").unwrap()["spec"]["replicas"], 3);
    }

    #[tokio::test]
    async fn test_object_controlled_by_someone_else_is_not_adopted() {
        let (cluster, _, reconciler) = setup(&fan_out_app());
        cluster.insert(&json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "nginx-edge",
                "namespace": NS,
                "ownerReferences": [{
                    "apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "other",
                    "uid": "someone-else", "controller": true
                }]
            },
            "spec": {"replicas": 7}
        }));

        let err = reconciler.reconcile(NS, "app-1").await.unwrap_err();

        assert!(matches!(err, Error::OwnershipConflict(_)));
        assert_eq!(deployment(&cluster, "nginx-edge").unwrap()["spec"]["replicas"], 7);
    }

    #[tokio::test]
    async fn test_template_change_preserves_fields_set_by_others() {
        let (cluster, _, reconciler) = setup(&fan_out_app());
        reconciler.reconcile(NS, "app-1").await.unwrap();

        cluster.modify("apps/v1", "Deployment", NS, "nginx-edge", |obj| {
            obj["metadata"]["labels"] = json!({"team": "ops"});
            obj["spec"]["paused"] = json!(true);
        });
        cluster.modify(
            "apps.kubeedge.io/v1alpha1",
            "EdgeApplication",
            NS,
            "app-1",
            |obj| obj["spec"]["workloadScope"]["targetNodeGroups"][0]["overriders"]["replicas"] = json!(5),
        );
        cluster.clear_writes();

        reconciler.reconcile(NS, "app-1").await.unwrap();

        assert_eq!(cluster.writes(), vec!["patch Deployment/nginx-edge".to_string()]);
        let live = deployment(&cluster, "nginx-edge").unwrap();
        assert_eq!(live["spec"]["replicas"], 5);
        assert_eq!(live["spec"]["paused"], true);
        assert_eq!(live["metadata"]["labels"]["team"], "ops");
    }

    #[tokio::test]
    async fn test_server_side_apply_mode_replaces_the_object() {
        let edge_app = fan_out_app();
        let cluster = Arc::new(FakeCluster::new());
        cluster.insert(&edge_app);
        let reconciler =
            EdgeApplicationReconciler::new(cluster.clone(), Arc::new(RecordingWatcher::default()), true);
        reconciler.reconcile(NS, "app-1").await.unwrap();

        cluster.modify(
            "apps.kubeedge.io/v1alpha1",
            "EdgeApplication",
            NS,
            "app-1",
            |obj| obj["spec"]["workloadScope"]["targetNodeGroups"][0]["overriders"]["replicas"] = json!(2),
        );
        cluster.clear_writes();
        reconciler.reconcile(NS, "app-1").await.unwrap();

        assert_eq!(cluster.writes(), vec!["update Deployment/nginx-edge".to_string()]);
        assert_eq!(deployment(&cluster, "nginx-edge").unwrap()["spec"]["replicas"], 2);
    }

    #[tokio::test]
    async fn test_deleted_child_is_recreated_after_status_trigger() {
        let (cluster, _, reconciler) = setup(&fan_out_app());
        reconciler.reconcile(NS, "app-1").await.unwrap();

        cluster.remove("apps/v1", "Deployment", NS, "nginx-edge");

        let (tx, mut rx) = mpsc::channel(8);
        let status_reconciler = StatusReconciler::new(deployment_gvk(), cluster.clone(), tx);
        status_reconciler.reconcile(NS, "app-1").await.unwrap();

        let target = rx.try_recv().expect("status reconcile triggers the application");
        assert_eq!(target.name, "app-1");
        assert_eq!(target.namespace.as_deref(), Some(NS));

        reconciler.reconcile(NS, &target.name).await.unwrap();
        assert!(deployment(&cluster, "nginx-edge").is_some());
    }

    #[tokio::test]
    async fn test_missing_or_deleting_application_is_ignored() {
        let cluster = Arc::new(FakeCluster::new());
        let reconciler =
            EdgeApplicationReconciler::new(cluster.clone(), Arc::new(RecordingWatcher::default()), false);
        reconciler.reconcile(NS, "absent").await.unwrap();

        let mut deleting = fan_out_app();
        deleting.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                "2024-01-01T00:00:00Z".parse().unwrap(),
            ),
        );
        cluster.insert(&deleting);
        reconciler.reconcile(NS, "app-1").await.unwrap();

        assert!(cluster.writes().is_empty());
        assert_eq!(cluster.status_writes(), 0);
    }
}
