//! Reconciler for EdgeApplications
//!
//! One pass decodes the embedded manifests, expands them per target,
//! records the produced objects in status, writes them, deletes objects
//! that are no longer produced and finally remembers what was produced.
//! Every step runs even when an earlier one failed; the errors are
//! returned together.

use std::collections::HashSet;
use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::client::WorkloadClient;
use crate::controller::status_manager::StatusWatcher;
use crate::crd::well_known::{
    ANNOTATION_LAST_CONTAINED_RESOURCES, ANNOTATION_SERVICE_TOPOLOGY,
    SERVICE_TOPOLOGY_RANGE_NODE_GROUP,
};
use crate::crd::EdgeApplication;
use crate::error::{Error, Result};
use crate::overrides::{OverrideInfo, OverrideManager};
use crate::template::{
    collect_overrider_bundles, decode_templates, is_override_target, is_service,
    resource_info_of, sort_resource_infos, ObjectKey, ResourceInfo, TemplateInfo,
};

use super::apply::{apply_template, owner_reference, set_annotation, set_controller_owner};
use super::status::status_skeleton;

pub(super) const CONTROLLER_NAME: &str = "edgeapplication";

/// One object to be written for an EdgeApplication
#[derive(Clone, Debug, PartialEq)]
pub struct Expansion {
    pub info: ResourceInfo,
    pub template: Value,
}

pub struct EdgeApplicationReconciler {
    client: Arc<dyn WorkloadClient>,
    status_watcher: Arc<dyn StatusWatcher>,
    overrides: OverrideManager,
    use_server_side_apply: bool,
}

impl EdgeApplicationReconciler {
    pub fn new(
        client: Arc<dyn WorkloadClient>,
        status_watcher: Arc<dyn StatusWatcher>,
        use_server_side_apply: bool,
    ) -> Self {
        Self {
            client,
            status_watcher,
            overrides: OverrideManager::default(),
            use_server_side_apply,
        }
    }

    #[instrument(skip(self), fields(name = %name, namespace = %namespace))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let Some(app) = self.client.get_edge_application(namespace, name).await? else {
            debug!("EdgeApplication {}/{} not found, nothing to do", namespace, name);
            return Ok(Action::await_change());
        };
        if app.metadata.deletion_timestamp.is_some() {
            debug!("EdgeApplication {}/{} is being deleted", namespace, name);
            return Ok(Action::await_change());
        }

        let mut errors = Vec::new();

        let (mut templates, decoded) = decode_templates(&app);
        if let Err(e) = decoded {
            warn!("Some manifests of {}/{} failed to decode: {}", namespace, name, e);
            errors.push(e);
        }

        let owner = owner_reference(&app)?;
        for template in &mut templates {
            set_controller_owner(&mut template.template, &owner)?;
        }

        let expansions = self.expand(&app, &templates, &mut errors);
        let produced: Vec<ResourceInfo> = expansions.iter().map(|e| e.info.clone()).collect();

        let failed_ordinals: Vec<usize> = (0..app.spec.workload_template.manifests.len())
            .filter(|ordinal| !templates.iter().any(|t| t.ordinal == *ordinal))
            .collect();
        let status = status_skeleton(app.status.as_ref(), &produced, &failed_ordinals);
        if app.status.as_ref() != Some(&status) {
            if let Err(e) = self
                .client
                .update_edge_application_status(namespace, name, &status)
                .await
            {
                errors.push(e);
            }
        }

        for expansion in &expansions {
            match apply_template(
                self.client.as_ref(),
                &app,
                &expansion.info,
                &expansion.template,
                self.use_server_side_apply,
            )
            .await
            {
                Ok(_) => {
                    if let Err(e) = self.status_watcher.watch_status(&expansion.info) {
                        error!("Failed to watch status of {}: {}", expansion.info, e);
                    }
                }
                Err(e) => {
                    warn!("Failed to apply {}: {}", expansion.info, e);
                    errors.push(e);
                }
            }
        }

        match self.collect_garbage(&app, &produced).await {
            Ok(()) => {
                if let Err(e) = self.record_contained(&app, produced).await {
                    errors.push(e);
                }
            }
            Err(e) => errors.push(e),
        }

        Error::aggregate(errors)?;
        Ok(Action::await_change())
    }

    /// Produce the objects to write, in ordinal order.
    ///
    /// Services get the node group topology annotation. Overridable kinds
    /// are expanded once per target; a failed expansion is skipped and its
    /// error recorded.
    pub fn expand(
        &self,
        app: &EdgeApplication,
        templates: &[TemplateInfo],
        errors: &mut Vec<Error>,
    ) -> Vec<Expansion> {
        let bundles = collect_overrider_bundles(app);
        let mut expansions = Vec::new();

        for template in templates {
            let gvk = template.gvk();
            if is_service(&gvk) {
                let mut obj = template.template.clone();
                set_annotation(
                    &mut obj,
                    ANNOTATION_SERVICE_TOPOLOGY,
                    SERVICE_TOPOLOGY_RANGE_NODE_GROUP,
                );
                expansions.push(expansion(template.ordinal, obj));
            } else if !is_override_target(&gvk) {
                expansions.push(expansion(template.ordinal, template.template.clone()));
            } else {
                for bundle in &bundles {
                    match self.override_template(template, bundle) {
                        Ok(obj) => expansions.push(expansion(template.ordinal, obj)),
                        Err(e) => {
                            warn!(
                                "Skipping expansion of manifest {} of {} for {}: {}",
                                template.ordinal,
                                app.name_any(),
                                bundle.target(),
                                e
                            );
                            #[cfg(feature = "metrics")]
                            crate::controller::metrics::inc_reconcile_error(
                                CONTROLLER_NAME,
                                e.metric_kind(),
                            );
                            errors.push(e);
                        }
                    }
                }
            }
        }
        expansions
    }

    fn override_template(&self, template: &TemplateInfo, bundle: &OverrideInfo) -> Result<Value> {
        let mut obj = template.template.clone();
        self.overrides.apply_overrides(&mut obj, bundle)?;
        Ok(obj)
    }

    /// Delete what the last pass produced and this one did not
    async fn collect_garbage(&self, app: &EdgeApplication, produced: &[ResourceInfo]) -> Result<()> {
        let Some(raw) = annotation_of(app) else {
            return Ok(());
        };
        let previous: Vec<ResourceInfo> = match serde_json::from_str(raw) {
            Ok(previous) => previous,
            Err(e) => {
                warn!(
                    "Ignoring unreadable {} on {}: {}",
                    ANNOTATION_LAST_CONTAINED_RESOURCES,
                    app.name_any(),
                    e
                );
                return Ok(());
            }
        };

        let current: HashSet<ObjectKey> = produced.iter().map(ResourceInfo::object_key).collect();
        let mut errors = Vec::new();
        for stale in previous.iter().filter(|p| !current.contains(&p.object_key())) {
            match self
                .client
                .delete_object(&stale.gvk(), &stale.namespace, &stale.name)
                .await
            {
                Ok(()) => info!("Deleted {} no longer produced by {}", stale, app.name_any()),
                Err(e) => errors.push(e),
            }
        }
        Error::aggregate(errors)
    }

    async fn record_contained(&self, app: &EdgeApplication, mut produced: Vec<ResourceInfo>) -> Result<()> {
        sort_resource_infos(&mut produced);
        let value = serde_json::to_string(&produced)?;
        if annotation_of(app) == Some(value.as_str()) {
            return Ok(());
        }
        self.client
            .set_edge_application_annotation(
                &app.namespace().unwrap_or_default(),
                &app.name_any(),
                ANNOTATION_LAST_CONTAINED_RESOURCES,
                &value,
            )
            .await
    }
}

fn expansion(ordinal: usize, template: Value) -> Expansion {
    let produced = TemplateInfo { ordinal, template };
    Expansion {
        info: resource_info_of(&produced),
        template: produced.template,
    }
}

fn annotation_of(app: &EdgeApplication) -> Option<&str> {
    app.annotations()
        .get(ANNOTATION_LAST_CONTAINED_RESOURCES)
        .map(String::as_str)
}
