//! In-memory cluster for reconciler tests
//!
//! Objects are stored as JSON keyed by (apiVersion, kind, namespace, name).
//! Writes other than status updates are recorded so tests can assert on
//! idempotence.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::core::{ErrorResponse, GroupVersionKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::client::{NodeGroupClient, WorkloadClient};
use crate::crd::{EdgeApplication, EdgeApplicationStatus, NodeGroup, NodeGroupStatus};
use crate::error::{Error, Result};
use crate::template::api_version_of;

type Key = (String, String, String, String);

const APPS_API_VERSION: &str = "apps.kubeedge.io/v1alpha1";

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    writes: Vec<String>,
    status_writes: usize,
    next_version: u64,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

pub fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("fake cluster: {reason}"),
        reason: reason.to_string(),
        code,
    }))
}

fn key(api_version: &str, kind: &str, namespace: &str, name: &str) -> Key {
    (
        api_version.to_string(),
        kind.to_string(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn key_of(obj: &Value) -> Key {
    let s = |p: &str| obj.pointer(p).and_then(Value::as_str).unwrap_or_default().to_string();
    (
        s("/apiVersion"),
        s("/kind"),
        s("/metadata/namespace"),
        s("/metadata/name"),
    )
}

fn gvk_key(gvk: &GroupVersionKind, namespace: &str, name: &str) -> Key {
    key(&api_version_of(&gvk.group, &gvk.version), &gvk.kind, namespace, name)
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Store an object as-is, assigning uid and resourceVersion
    pub fn insert<T: Serialize>(&self, obj: &T) {
        let mut value = serde_json::to_value(obj).unwrap();
        self.with_state(|state| {
            state.next_version += 1;
            let version = state.next_version;
            let metadata = value["metadata"].as_object_mut().unwrap();
            metadata
                .entry("uid")
                .or_insert_with(|| json!(format!("uid-{version}")));
            metadata.insert("resourceVersion".into(), json!(version.to_string()));
            state.objects.insert(key_of(&value), value);
        });
    }

    pub fn get_raw(&self, api_version: &str, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        self.with_state(|state| state.objects.get(&key(api_version, kind, namespace, name)).cloned())
    }

    pub fn get_typed<T: DeserializeOwned>(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Option<T> {
        self.get_raw(api_version, kind, namespace, name)
            .map(|v| serde_json::from_value(v).unwrap())
    }

    pub fn node(&self, name: &str) -> Node {
        self.get_typed("v1", "Node", "", name).unwrap()
    }

    pub fn node_group(&self, name: &str) -> Option<NodeGroup> {
        self.get_typed(APPS_API_VERSION, "NodeGroup", "", name)
    }

    pub fn pod_exists(&self, namespace: &str, name: &str) -> bool {
        self.get_raw("v1", "Pod", namespace, name).is_some()
    }

    pub fn edge_application(&self, namespace: &str, name: &str) -> EdgeApplication {
        self.get_typed(APPS_API_VERSION, "EdgeApplication", namespace, name)
            .unwrap()
    }

    /// Objects of one kind, sorted by name
    pub fn list_kind(&self, api_version: &str, kind: &str) -> Vec<Value> {
        self.with_state(|state| {
            state
                .objects
                .iter()
                .filter(|((av, k, _, _), _)| av == api_version && k == kind)
                .map(|(_, v)| v.clone())
                .collect()
        })
    }

    /// Mutate a stored object in place, as another actor would
    pub fn modify(&self, api_version: &str, kind: &str, namespace: &str, name: &str, f: impl FnOnce(&mut Value)) {
        self.with_state(|state| {
            let obj = state
                .objects
                .get_mut(&key(api_version, kind, namespace, name))
                .unwrap();
            f(obj);
        });
    }

    /// Delete bypassing finalizers and writes log
    pub fn remove(&self, api_version: &str, kind: &str, namespace: &str, name: &str) {
        self.with_state(|state| {
            state.objects.remove(&key(api_version, kind, namespace, name));
        });
    }

    /// Delete a NodeGroup the way the API server does: with finalizers
    /// present only the deletion timestamp is set.
    pub fn delete_node_group(&self, name: &str) {
        self.with_state(|state| {
            let k = key(APPS_API_VERSION, "NodeGroup", "", name);
            let Some(obj) = state.objects.get_mut(&k) else {
                return;
            };
            let has_finalizers = obj["metadata"]["finalizers"]
                .as_array()
                .is_some_and(|f| !f.is_empty());
            if has_finalizers {
                obj["metadata"]["deletionTimestamp"] = json!("2024-01-01T00:00:00Z");
            } else {
                state.objects.remove(&k);
            }
        });
    }

    pub fn writes(&self) -> Vec<String> {
        self.with_state(|state| state.writes.clone())
    }

    pub fn status_writes(&self) -> usize {
        self.with_state(|state| state.status_writes)
    }

    pub fn clear_writes(&self) {
        self.with_state(|state| {
            state.writes.clear();
            state.status_writes = 0;
        });
    }

    fn bump(state: &mut State, obj: &mut Value) {
        state.next_version += 1;
        obj["metadata"]["resourceVersion"] = json!(state.next_version.to_string());
    }

    fn merge_into(&self, k: Key, patch: &Value, record: String) -> Result<()> {
        self.with_state(|state| {
            let mut obj = state
                .objects
                .get(&k)
                .cloned()
                .ok_or_else(|| api_error(404, "NotFound"))?;
            if let Some(expected) = patch.pointer("/metadata/resourceVersion") {
                if obj.pointer("/metadata/resourceVersion") != Some(expected) {
                    return Err(api_error(409, "Conflict"));
                }
            }
            json_patch::merge(&mut obj, patch);
            Self::bump(state, &mut obj);
            state.writes.push(record);
            state.objects.insert(k, obj);
            Ok(())
        })
    }

    fn set_status<T: Serialize>(&self, k: Key, status: &T) -> Result<()> {
        let status = serde_json::to_value(status)?;
        self.with_state(|state| {
            let obj = state
                .objects
                .get_mut(&k)
                .ok_or_else(|| api_error(404, "NotFound"))?;
            obj["status"] = status;
            state.status_writes += 1;
            Ok(())
        })
    }

    fn typed<T: DeserializeOwned>(value: Option<Value>) -> Result<Option<T>> {
        value.map(serde_json::from_value).transpose().map_err(Error::from)
    }
}

fn labels_match(obj: &Value, labels: &BTreeMap<String, String>) -> bool {
    labels.iter().all(|(k, v)| {
        obj.pointer("/metadata/labels")
            .and_then(|l| l.get(k))
            .and_then(Value::as_str)
            == Some(v.as_str())
    })
}

#[async_trait]
impl NodeGroupClient for FakeCluster {
    async fn get_node_group(&self, name: &str) -> Result<Option<NodeGroup>> {
        Self::typed(self.get_raw(APPS_API_VERSION, "NodeGroup", "", name))
    }

    async fn set_node_group_finalizers(&self, name: &str, finalizers: &[String]) -> Result<()> {
        let k = key(APPS_API_VERSION, "NodeGroup", "", name);
        self.merge_into(
            k.clone(),
            &json!({"metadata": {"finalizers": finalizers}}),
            format!("finalizers nodegroup/{name}"),
        )?;
        self.with_state(|state| {
            let release = state.objects.get(&k).is_some_and(|obj| {
                obj["metadata"].get("deletionTimestamp").is_some() && finalizers.is_empty()
            });
            if release {
                state.objects.remove(&k);
            }
        });
        Ok(())
    }

    async fn update_node_group_status(&self, name: &str, status: &NodeGroupStatus) -> Result<()> {
        self.set_status(key(APPS_API_VERSION, "NodeGroup", "", name), status)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Self::typed(self.get_raw("v1", "Node", "", name))
    }

    async fn list_nodes_with_labels(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Node>> {
        self.list_kind("v1", "Node")
            .into_iter()
            .filter(|n| labels_match(n, labels))
            .map(|n| serde_json::from_value(n).map_err(Error::from))
            .collect()
    }

    async fn patch_node(&self, name: &str, patch: &Value) -> Result<()> {
        self.merge_into(key("v1", "Node", "", name), patch, format!("patch node/{name}"))
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        self.list_kind("v1", "Pod")
            .into_iter()
            .filter(|p| p.pointer("/spec/nodeName").and_then(Value::as_str) == Some(node_name))
            .map(|p| serde_json::from_value(p).map_err(Error::from))
            .collect()
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.with_state(|state| {
            if state.objects.remove(&key("v1", "Pod", namespace, name)).is_some() {
                state.writes.push(format!("delete pod/{namespace}/{name}"));
            }
        });
        Ok(())
    }
}

#[async_trait]
impl WorkloadClient for FakeCluster {
    async fn get_edge_application(&self, namespace: &str, name: &str) -> Result<Option<EdgeApplication>> {
        Self::typed(self.get_raw(APPS_API_VERSION, "EdgeApplication", namespace, name))
    }

    async fn list_edge_applications(&self) -> Result<Vec<EdgeApplication>> {
        self.list_kind(APPS_API_VERSION, "EdgeApplication")
            .into_iter()
            .map(|a| serde_json::from_value(a).map_err(Error::from))
            .collect()
    }

    async fn set_edge_application_annotation(
        &self,
        namespace: &str,
        name: &str,
        annotation: &str,
        value: &str,
    ) -> Result<()> {
        self.merge_into(
            key(APPS_API_VERSION, "EdgeApplication", namespace, name),
            &json!({"metadata": {"annotations": {annotation: value}}}),
            format!("annotate edgeapplication/{namespace}/{name}"),
        )
    }

    async fn update_edge_application_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EdgeApplicationStatus,
    ) -> Result<()> {
        self.set_status(
            key(APPS_API_VERSION, "EdgeApplication", namespace, name),
            status,
        )
    }

    async fn get_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<Option<Value>> {
        Ok(self.with_state(|state| state.objects.get(&gvk_key(gvk, namespace, name)).cloned()))
    }

    async fn create_object(&self, _gvk: &GroupVersionKind, obj: &Value) -> Result<()> {
        let mut obj = obj.clone();
        self.with_state(|state| {
            let k = key_of(&obj);
            if state.objects.contains_key(&k) {
                return Err(api_error(409, "AlreadyExists"));
            }
            Self::bump(state, &mut obj);
            obj["metadata"]["uid"] = json!(format!("uid-{}", state.next_version));
            state.writes.push(format!("create {}/{}", k.1, k.3));
            state.objects.insert(k, obj);
            Ok(())
        })
    }

    async fn update_object(&self, _gvk: &GroupVersionKind, obj: &Value) -> Result<()> {
        let mut obj = obj.clone();
        self.with_state(|state| {
            let k = key_of(&obj);
            let Some(live) = state.objects.get(&k) else {
                return Err(api_error(404, "NotFound"));
            };
            if obj["metadata"]["resourceVersion"] != live["metadata"]["resourceVersion"] {
                return Err(api_error(409, "Conflict"));
            }
            if let Some(status) = live.get("status").cloned() {
                obj["status"] = status;
            }
            obj["metadata"]["uid"] = live["metadata"]["uid"].clone();
            Self::bump(state, &mut obj);
            state.writes.push(format!("update {}/{}", k.1, k.3));
            state.objects.insert(k, obj);
            Ok(())
        })
    }

    async fn patch_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        self.merge_into(
            gvk_key(gvk, namespace, name),
            patch,
            format!("patch {}/{}", gvk.kind, name),
        )
    }

    async fn delete_object(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<()> {
        self.with_state(|state| {
            if state.objects.remove(&gvk_key(gvk, namespace, name)).is_some() {
                state.writes.push(format!("delete {}/{}", gvk.kind, name));
            }
        });
        Ok(())
    }
}
