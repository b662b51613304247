//! # Event Sources
//!
//! The EventSource an add-on references is deployed to each managed cluster
//! it targets, under its own ownership, so add-ons sharing an event source
//! share one copy. A copy is removed once no add-on targeting the cluster
//! references it anymore.

use kube::Resource;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::controller::deployer::{DeploymentOwner, RenderedResource};
use crate::controller::error::AddOnError;
use crate::controller::keys::{AddOnKey, ClusterKey};
use crate::controller::reconciler::types::Reconciler;
use crate::crd::{EventSource, ReferencedKind};

/// Manifest of `event_source` as applied in a managed cluster
///
/// # Errors
///
/// `Serialization` when the spec cannot be serialized.
pub fn event_source_manifest(event_source: &EventSource) -> Result<Value, AddOnError> {
    Ok(json!({
        "apiVersion": EventSource::api_version(&()),
        "kind": EventSource::kind(&()),
        "metadata": { "name": event_source.metadata.name.clone().unwrap_or_default() },
        "spec": serde_json::to_value(&event_source.spec)?,
    }))
}

/// Deploy `event_source` to `cluster`
///
/// # Errors
///
/// Returns the deployment error of the engine.
pub async fn deploy_event_source(
    ctx: &Reconciler,
    cluster: &ClusterKey,
    event_source: &EventSource,
) -> Result<(), AddOnError> {
    let name = event_source.metadata.name.clone().unwrap_or_default();
    let owner = DeploymentOwner::event_source(&name);
    let manifest = event_source_manifest(event_source)?;
    ctx.engine
        .deploy(cluster, &owner, &[RenderedResource::Manifest(manifest)])
        .await?;
    debug!(cluster = %cluster, event_source = %name, "EventSource deployed");
    Ok(())
}

/// Event sources referenced by add-ons other than `exclude` that target `cluster`
fn event_sources_in_use(ctx: &Reconciler, cluster: &ClusterKey, exclude: &AddOnKey) -> BTreeSet<String> {
    ctx.index
        .get_cluster_map_for_entry(cluster)
        .iter()
        .filter(|key| *key != exclude)
        .flat_map(|key| ctx.index.tracked_references(key))
        .filter(|reference| reference.kind == ReferencedKind::EventSource)
        .map(|reference| reference.name)
        .collect()
}

/// Remove from `cluster` every event source in `candidates` that no other
/// add-on targeting the cluster still references
///
/// # Errors
///
/// Returns the first removal error; the remaining candidates are still tried.
pub async fn remove_stale_event_sources(
    ctx: &Reconciler,
    cluster: &ClusterKey,
    candidates: &BTreeSet<String>,
    exclude: &AddOnKey,
) -> Result<(), AddOnError> {
    let in_use = event_sources_in_use(ctx, cluster, exclude);
    let mut first_error = None;
    for name in candidates.iter().filter(|name| !in_use.contains(*name)) {
        match ctx
            .engine
            .remove(cluster, &DeploymentOwner::event_source(name))
            .await
        {
            Ok(()) => info!(cluster = %cluster, event_source = %name, "Removed stale EventSource"),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::EventSourceSpec;

    #[test]
    fn test_event_source_manifest() {
        let event_source = EventSource::new(
            "load-balancer",
            EventSourceSpec {
                group: String::new(),
                version: "v1".into(),
                kind: "Service".into(),
                namespace: None,
                label_filters: vec![],
                script: None,
                collect_resources: true,
            },
        );

        let manifest = event_source_manifest(&event_source).unwrap();

        assert_eq!(manifest["apiVersion"], "lib.projectsveltos.io/v1alpha1");
        assert_eq!(manifest["kind"], "EventSource");
        assert_eq!(manifest["metadata"]["name"], "load-balancer");
        assert_eq!(manifest["spec"]["kind"], "Service");
    }
}
