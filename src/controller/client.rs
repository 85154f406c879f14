//! Cluster access used by the reconcilers
//!
//! The reconcilers only see the [`NodeGroupClient`] and [`WorkloadClient`]
//! traits. [`KubeClusterClient`] implements both against the API server;
//! tests use an in-memory cluster instead.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::core::{ApiResource, GroupVersionKind};
use kube::discovery::{self, Scope};
use kube::Client;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::crd::{EdgeApplication, EdgeApplicationStatus, NodeGroup, NodeGroupStatus};
use crate::error::{Error, Result};

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "kubeedge-apps-operator";

#[async_trait]
pub trait NodeGroupClient: Send + Sync {
    async fn get_node_group(&self, name: &str) -> Result<Option<NodeGroup>>;

    async fn set_node_group_finalizers(&self, name: &str, finalizers: &[String]) -> Result<()>;

    async fn update_node_group_status(&self, name: &str, status: &NodeGroupStatus) -> Result<()>;

    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    /// Nodes carrying every label in `labels`
    async fn list_nodes_with_labels(&self, labels: &BTreeMap<String, String>)
        -> Result<Vec<Node>>;

    /// Apply a JSON merge patch to a node
    async fn patch_node(&self, name: &str, patch: &Value) -> Result<()>;

    /// Pods bound to `node_name`
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;

    /// Delete a pod; a missing pod is not an error
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait WorkloadClient: Send + Sync {
    async fn get_edge_application(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EdgeApplication>>;

    async fn list_edge_applications(&self) -> Result<Vec<EdgeApplication>>;

    async fn set_edge_application_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;

    async fn update_edge_application_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EdgeApplicationStatus,
    ) -> Result<()>;

    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>>;

    async fn create_object(&self, gvk: &GroupVersionKind, obj: &Value) -> Result<()>;

    /// Replace an object; `obj` must carry the live resourceVersion
    async fn update_object(&self, gvk: &GroupVersionKind, obj: &Value) -> Result<()>;

    /// Apply a JSON merge patch to an object
    async fn patch_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<()>;

    /// Delete an object; a missing object is not an error
    async fn delete_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str)
        -> Result<()>;
}

/// [`NodeGroupClient`] and [`WorkloadClient`] backed by the API server
pub struct KubeClusterClient {
    client: Client,
    resources: RwLock<HashMap<GroupVersionKind, (ApiResource, bool)>>,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolve a GVK through discovery, caching the result
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
        if let Some(found) = self.resources.read().await.get(gvk) {
            return Ok(found.clone());
        }

        let (resource, capabilities) = discovery::pinned_kind(&self.client, gvk).await?;
        let namespaced = matches!(capabilities.scope, Scope::Namespaced);
        debug!(
            "Discovered {}/{} {} as {} (namespaced: {})",
            gvk.group, gvk.version, gvk.kind, resource.plural, namespaced
        );
        self.resources
            .write()
            .await
            .insert(gvk.clone(), (resource.clone(), namespaced));
        Ok((resource, namespaced))
    }

    async fn dynamic_api(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
    ) -> Result<Api<DynamicObject>> {
        let (resource, namespaced) = self.resolve(gvk).await?;
        Ok(if namespaced && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        })
    }

    fn node_groups(&self) -> Api<NodeGroup> {
        Api::all(self.client.clone())
    }

    fn edge_applications(&self, namespace: &str) -> Api<EdgeApplication> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_name(obj: &Value) -> Result<String> {
    obj.pointer("/metadata/name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::ConfigError("object has no metadata.name".to_string()))
}

fn object_namespace(obj: &Value) -> &str {
    obj.pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Treat an API 404 as success
fn ignore_not_found(result: std::result::Result<(), kube::Error>) -> Result<()> {
    match result {
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        other => other.map_err(Error::from),
    }
}

#[async_trait]
impl NodeGroupClient for KubeClusterClient {
    async fn get_node_group(&self, name: &str) -> Result<Option<NodeGroup>> {
        Ok(self.node_groups().get_opt(name).await?)
    }

    async fn set_node_group_finalizers(&self, name: &str, finalizers: &[String]) -> Result<()> {
        let patch = json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.node_groups()
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn update_node_group_status(&self, name: &str, status: &NodeGroupStatus) -> Result<()> {
        let patch = json!({ "status": status });
        self.node_groups()
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.get_opt(name).await?)
    }

    async fn list_nodes_with_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Node>> {
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.list(&ListParams::default().labels(&selector)).await?.items)
    }

    async fn patch_node(&self, name: &str, patch: &Value) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        nodes
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        Ok(pods.list(&params).await?.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(pods.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }
}

#[async_trait]
impl WorkloadClient for KubeClusterClient {
    async fn get_edge_application(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EdgeApplication>> {
        Ok(self.edge_applications(namespace).get_opt(name).await?)
    }

    async fn list_edge_applications(&self) -> Result<Vec<EdgeApplication>> {
        let api: Api<EdgeApplication> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn set_edge_application_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let patch = json!({
            "metadata": {
                "annotations": { key: value }
            }
        });
        self.edge_applications(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn update_edge_application_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EdgeApplicationStatus,
    ) -> Result<()> {
        let patch = json!({ "status": status });
        self.edge_applications(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>> {
        let api = self.dynamic_api(gvk, namespace).await?;
        match api.get_opt(name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn create_object(&self, gvk: &GroupVersionKind, obj: &Value) -> Result<()> {
        let api = self.dynamic_api(gvk, object_namespace(obj)).await?;
        let dynamic: DynamicObject = serde_json::from_value(obj.clone())?;
        api.create(&PostParams::default(), &dynamic).await?;
        Ok(())
    }

    async fn update_object(&self, gvk: &GroupVersionKind, obj: &Value) -> Result<()> {
        let api = self.dynamic_api(gvk, object_namespace(obj)).await?;
        let name = object_name(obj)?;
        let dynamic: DynamicObject = serde_json::from_value(obj.clone())?;
        api.replace(&name, &PostParams::default(), &dynamic).await?;
        Ok(())
    }

    async fn patch_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<()> {
        let api = self.dynamic_api(gvk, namespace).await?;
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn delete_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        let api = self.dynamic_api(gvk, namespace).await?;
        ignore_not_found(
            api.delete(name, &DeleteParams::background())
                .await
                .map(|_| ()),
        )
    }
}
