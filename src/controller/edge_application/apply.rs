//! Writing produced objects to the cluster
//!
//! Every produced object carries the JSON of the template it was last
//! written from. A later write diffs the stored template against the new
//! one and merges only that difference into the live object, so fields set
//! by other actors survive.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::controller::client::WorkloadClient;
use crate::controller::merge_patch::{create_merge_patch, is_empty_patch};
use crate::crd::well_known::ANNOTATION_LAST_APPLIED_TEMPLATE;
use crate::crd::EdgeApplication;
use crate::error::{Error, Result};
use crate::template::ResourceInfo;

/// How a produced object was written
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Adopted,
    Updated,
    Patched,
    Unchanged,
}

/// Set `key` in `metadata.annotations`, creating the maps as needed
pub fn set_annotation(obj: &mut Value, key: &str, value: &str) {
    let Some(object) = obj.as_object_mut() else {
        return;
    };
    let metadata = object
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(metadata) = metadata.as_object_mut() else {
        return;
    };
    let annotations = metadata
        .entry("annotations")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(annotations) = annotations.as_object_mut() {
        annotations.insert(key.to_string(), Value::String(value.to_string()));
    }
}

pub fn annotation<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.pointer("/metadata/annotations")
        .and_then(|a| a.get(key))
        .and_then(Value::as_str)
}

fn remove_annotation(obj: &mut Value, key: &str) {
    if let Some(annotations) = obj
        .pointer_mut("/metadata/annotations")
        .and_then(Value::as_object_mut)
    {
        annotations.remove(key);
    }
}

fn owner_references(obj: &Value) -> Result<Vec<OwnerReference>> {
    match obj.pointer("/metadata/ownerReferences") {
        Some(refs) => Ok(serde_json::from_value(refs.clone())?),
        None => Ok(Vec::new()),
    }
}

/// Make `owner` the controller of `obj`.
///
/// A controller reference of the same apiVersion and kind is replaced;
/// other references are kept.
pub fn set_controller_owner(obj: &mut Value, owner: &OwnerReference) -> Result<()> {
    let mut refs = owner_references(obj)?;
    match refs.iter_mut().find(|r| {
        r.controller == Some(true) && r.api_version == owner.api_version && r.kind == owner.kind
    }) {
        Some(existing) => *existing = owner.clone(),
        None => refs.push(owner.clone()),
    }

    let refs = serde_json::to_value(refs)?;
    if let Some(object) = obj.as_object_mut() {
        let metadata = object
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("ownerReferences".to_string(), refs);
        }
    }
    Ok(())
}

/// Controller owner reference pointing at `app`
pub fn owner_reference(app: &EdgeApplication) -> Result<OwnerReference> {
    app.controller_owner_ref(&()).ok_or_else(|| {
        Error::ConfigError(format!(
            "EdgeApplication {} has no uid",
            app.metadata.name.as_deref().unwrap_or_default()
        ))
    })
}

/// An object without a stored template may only be taken over when nobody
/// else controls it
fn check_adoptable(live: &Value, app: &EdgeApplication, info: &ResourceInfo) -> Result<()> {
    let refs = owner_references(live)?;
    match refs.iter().find(|r| r.controller == Some(true)) {
        None => Ok(()),
        Some(r) if app.metadata.uid.as_deref() == Some(r.uid.as_str()) => Ok(()),
        Some(r) => Err(Error::OwnershipConflict(format!(
            "{} is controlled by {} {}",
            info, r.kind, r.name
        ))),
    }
}

fn with_resource_version(obj: &mut Value, live: &Value) {
    if let (Some(version), Some(metadata)) = (
        live.pointer("/metadata/resourceVersion").cloned(),
        obj.pointer_mut("/metadata").and_then(Value::as_object_mut),
    ) {
        metadata.insert("resourceVersion".to_string(), version);
    }
}

/// Create or update one produced object
pub async fn apply_template(
    client: &dyn WorkloadClient,
    app: &EdgeApplication,
    info: &ResourceInfo,
    template: &Value,
    use_server_side_apply: bool,
) -> Result<ApplyOutcome> {
    let gvk = info.gvk();

    let mut desired = template.clone();
    remove_annotation(&mut desired, ANNOTATION_LAST_APPLIED_TEMPLATE);
    let desired_json = serde_json::to_string(&desired)?;
    set_annotation(&mut desired, ANNOTATION_LAST_APPLIED_TEMPLATE, &desired_json);

    let Some(live) = client.get_object(&gvk, &info.namespace, &info.name).await? else {
        client.create_object(&gvk, &desired).await?;
        info!("Created {}", info);
        return Ok(ApplyOutcome::Created);
    };

    let Some(stored) = annotation(&live, ANNOTATION_LAST_APPLIED_TEMPLATE) else {
        check_adoptable(&live, app, info)?;
        with_resource_version(&mut desired, &live);
        client.update_object(&gvk, &desired).await?;
        info!("Adopted {}", info);
        return Ok(ApplyOutcome::Adopted);
    };

    if stored == desired_json {
        debug!("{} is up to date", info);
        return Ok(ApplyOutcome::Unchanged);
    }

    if use_server_side_apply {
        with_resource_version(&mut desired, &live);
        client.update_object(&gvk, &desired).await?;
        info!("Updated {}", info);
        return Ok(ApplyOutcome::Updated);
    }

    let previous: Value = serde_json::from_str(stored)?;
    let template_patch = create_merge_patch(&previous, &desired);
    let mut merged = live.clone();
    json_patch::merge(&mut merged, &template_patch);

    let patch = create_merge_patch(&live, &merged);
    if is_empty_patch(&patch) {
        return Ok(ApplyOutcome::Unchanged);
    }
    client
        .patch_object(&gvk, &info.namespace, &info.name, &patch)
        .await?;
    info!("Patched {}", info);
    Ok(ApplyOutcome::Patched)
}
