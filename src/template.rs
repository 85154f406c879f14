//! Workload template helpers
//!
//! Manifests embedded in an EdgeApplication are decoded into JSON trees
//! tagged with their position (ordinal) in the manifest list. Ordinals stay
//! stable even when some manifests fail to decode.

use std::fmt;

use kube::core::GroupVersionKind;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crd::{EdgeApplication, ResourceIdentifier};
use crate::error::{Error, Result};
use crate::overrides::OverrideInfo;

/// One decoded manifest
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateInfo {
    pub ordinal: usize,
    pub template: Value,
}

impl TemplateInfo {
    pub fn api_version(&self) -> &str {
        str_at(&self.template, "/apiVersion")
    }

    pub fn kind(&self) -> &str {
        str_at(&self.template, "/kind")
    }

    pub fn name(&self) -> &str {
        str_at(&self.template, "/metadata/name")
    }

    pub fn namespace(&self) -> &str {
        str_at(&self.template, "/metadata/namespace")
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = split_api_version(self.api_version());
        GroupVersionKind::gvk(group, version, self.kind())
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

/// Split `group/version` (or a bare core `version`) into its parts
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

pub fn api_version_of(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}

/// Decode every manifest of `app`.
///
/// Manifests may be embedded objects or YAML strings. Failures are
/// collected into the returned error while the remaining manifests still
/// decode. Templates without a namespace inherit the EdgeApplication's.
pub fn decode_templates(app: &EdgeApplication) -> (Vec<TemplateInfo>, Result<()>) {
    let default_namespace = app.namespace().unwrap_or_default();
    let mut templates = Vec::new();
    let mut errors = Vec::new();

    for (ordinal, manifest) in app.spec.workload_template.manifests.iter().enumerate() {
        match decode_manifest(ordinal, manifest, &default_namespace) {
            Ok(template) => templates.push(TemplateInfo { ordinal, template }),
            Err(e) => errors.push(e),
        }
    }

    (templates, Error::aggregate(errors))
}

fn decode_manifest(ordinal: usize, manifest: &Value, default_namespace: &str) -> Result<Value> {
    let parse_error = |message: String| Error::ParseError { ordinal, message };

    let mut template = match manifest {
        Value::String(raw) => serde_yaml::from_str::<Value>(raw)
            .map_err(|e| parse_error(format!("invalid YAML: {e}")))?,
        Value::Object(_) => manifest.clone(),
        other => return Err(parse_error(format!("unexpected manifest type: {other}"))),
    };

    let Some(object) = template.as_object_mut() else {
        return Err(parse_error("manifest is not an object".to_string()));
    };
    for field in ["apiVersion", "kind"] {
        if object.get(field).and_then(Value::as_str).unwrap_or_default().is_empty() {
            return Err(parse_error(format!("missing {field}")));
        }
    }

    let metadata = object
        .entry("metadata")
        .or_insert_with(|| Value::Object(Default::default()));
    let Some(metadata) = metadata.as_object_mut() else {
        return Err(parse_error("metadata is not an object".to_string()));
    };
    if metadata.get("name").and_then(Value::as_str).unwrap_or_default().is_empty() {
        return Err(parse_error("missing metadata.name".to_string()));
    }
    let has_namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .is_some_and(|ns| !ns.is_empty());
    if !has_namespace && !default_namespace.is_empty() {
        metadata.insert(
            "namespace".to_string(),
            Value::String(default_namespace.to_string()),
        );
    }

    Ok(template)
}

/// One override bundle per target node group, then one per target node
/// label selector, in declaration order
pub fn collect_overrider_bundles(app: &EdgeApplication) -> Vec<OverrideInfo> {
    let scope = &app.spec.workload_scope;
    scope
        .target_node_groups
        .iter()
        .map(OverrideInfo::from)
        .chain(scope.target_node_labels.iter().map(OverrideInfo::from))
        .collect()
}

/// Canonical identity of a produced object
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub ordinal: usize,
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

/// Identity of an object in the cluster, ignoring which manifest made it
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceInfo {
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    pub fn api_version(&self) -> String {
        api_version_of(&self.group, &self.version)
    }

    pub fn object_key(&self) -> ObjectKey {
        ObjectKey {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier {
            ordinal: self.ordinal,
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for ResourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}, kind={}, namespace={}, name={}",
            self.ordinal, self.group, self.version, self.kind, self.namespace, self.name
        )
    }
}

pub fn resource_info_of(info: &TemplateInfo) -> ResourceInfo {
    let (group, version) = split_api_version(info.api_version());
    ResourceInfo {
        ordinal: info.ordinal,
        group: group.to_string(),
        version: version.to_string(),
        kind: info.kind().to_string(),
        namespace: info.namespace().to_string(),
        name: info.name().to_string(),
    }
}

/// Sort resource infos by their string form
pub fn sort_resource_infos(infos: &mut [ResourceInfo]) {
    infos.sort_by_cached_key(ToString::to_string);
}

/// Kinds that are fanned out per target through the override pipeline
pub fn is_override_target(gvk: &GroupVersionKind) -> bool {
    gvk.group == "apps" && gvk.kind == "Deployment"
}

pub fn is_service(gvk: &GroupVersionKind) -> bool {
    gvk.group.is_empty() && gvk.version == "v1" && gvk.kind == "Service"
}
