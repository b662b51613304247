//! # Finalization
//!
//! Two-phase deletion of an add-on. While the finalizer is present the
//! add-on is removed from every cluster it was deployed to; the finalizer is
//! released once that succeeded, or after a bounded number of failed
//! attempts (counted in an annotation so restarts do not reset the bound).

use futures::future::join_all;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::controller::error::AddOnError;
use crate::controller::keys::{get_key_from_object, ClusterKey};
use crate::controller::reconciler::cluster::cancellable;
use crate::controller::reconciler::process::remove_from_cluster;
use crate::controller::reconciler::status::{
    persist_status, remove_cluster_info_entry, set_ready_condition, update_cluster_info,
    ClusterUpdate,
};
use crate::controller::reconciler::types::Reconciler;
use crate::crd::{EventBasedAddOn, CLEANUP_ATTEMPTS_ANNOTATION, EVENT_BASED_ADD_ON_FINALIZER};
use crate::observability::metrics;

/// Where an add-on stands in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Live, finalizer not added yet
    NeedsFinalizer,
    Active,
    /// Deletion requested, cleanup pending
    Terminating,
    /// Deletion requested and finalizer gone
    Released,
}

impl LifecyclePhase {
    #[must_use]
    pub fn of(add_on: &EventBasedAddOn) -> Self {
        let has_finalizer = add_on
            .finalizers()
            .iter()
            .any(|f| f == EVENT_BASED_ADD_ON_FINALIZER);
        match (add_on.metadata.deletion_timestamp.is_some(), has_finalizer) {
            (false, false) => LifecyclePhase::NeedsFinalizer,
            (false, true) => LifecyclePhase::Active,
            (true, true) => LifecyclePhase::Terminating,
            (true, false) => LifecyclePhase::Released,
        }
    }
}

/// Add the finalizer to a live add-on
///
/// # Errors
///
/// Returns the store error when the update fails.
pub async fn add_finalizer(ctx: &Reconciler, add_on: &EventBasedAddOn) -> Result<(), AddOnError> {
    let mut finalizers = add_on.finalizers().to_vec();
    finalizers.push(EVENT_BASED_ADD_ON_FINALIZER.to_string());
    ctx.store.set_finalizers(&add_on.name_any(), finalizers).await
}

async fn release_finalizer(ctx: &Reconciler, add_on: &EventBasedAddOn) -> Result<(), AddOnError> {
    let finalizers: Vec<String> = add_on
        .finalizers()
        .iter()
        .filter(|f| *f != EVENT_BASED_ADD_ON_FINALIZER)
        .cloned()
        .collect();
    ctx.store.set_finalizers(&add_on.name_any(), finalizers).await
}

/// Failed cleanup attempts recorded on the add-on
#[must_use]
pub fn cleanup_attempts(add_on: &EventBasedAddOn) -> u32 {
    add_on
        .annotations()
        .get(CLEANUP_ATTEMPTS_ANNOTATION)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Every cluster the add-on may have deployed to
fn deployed_clusters(ctx: &Reconciler, add_on: &EventBasedAddOn) -> BTreeSet<ClusterKey> {
    let key = get_key_from_object(add_on);
    let mut clusters = ctx.index.tracked_clusters(&key);
    if let Some(status) = &add_on.status {
        clusters.extend(status.cluster_info.iter().map(|ci| ci.cluster.clone()));
        clusters.extend(status.matching_cluster_refs.iter().cloned());
    }
    clusters
}

/// Remove the add-on from every cluster, clean the index, release the finalizer
///
/// Removals run under the pass deadline; one still in flight when it fires
/// counts as a failed attempt. ClusterInfo entries of cleaned clusters are
/// dropped so status lists only the clusters still blocking deletion.
///
/// # Errors
///
/// Returns the first removal error while attempts remain, so the add-on is
/// retried with backoff, or `Cancelled` on shutdown.
pub async fn finalize(
    ctx: &Reconciler,
    add_on: &EventBasedAddOn,
    cancel: &CancellationToken,
) -> Result<Action, AddOnError> {
    let key = get_key_from_object(add_on);
    ctx.mark_terminating(&key);

    let clusters = deployed_clusters(ctx, add_on);
    info!(clusters = clusters.len(), "Removing add-on from all clusters");

    let event_sources = BTreeSet::from([add_on.spec.event_source_name.clone()]);
    let removals = clusters.iter().map(|cluster| {
        let key = &key;
        let event_sources = &event_sources;
        async move {
            let result = cancellable(cancel, remove_from_cluster(ctx, key, cluster, event_sources)).await;
            (cluster, result)
        }
    });

    let mut status = add_on.status.clone().unwrap_or_default();
    let mut failures: Vec<(&ClusterKey, AddOnError)> = Vec::new();
    for (cluster, result) in join_all(removals).await {
        match result {
            Ok(()) => {
                remove_cluster_info_entry(&mut status, cluster);
            }
            Err(AddOnError::Cancelled) if ctx.shutdown.is_cancelled() => {
                return Err(AddOnError::Cancelled);
            }
            Err(error) => {
                if matches!(error, AddOnError::Cancelled) {
                    warn!(cluster = %cluster, "Removal did not complete before the deadline");
                }
                update_cluster_info(
                    &mut status,
                    cluster,
                    ClusterUpdate::Failed {
                        message: format!("removal failed: {error}"),
                    },
                );
                failures.push((cluster, error));
            }
        }
    }

    if let Some((cluster, first)) = failures.into_iter().next() {
        let attempts = cleanup_attempts(add_on) + 1;
        if attempts < ctx.config.max_cleanup_attempts {
            warn!(
                cluster = %cluster,
                error = %first,
                attempts,
                "Cleanup failed, will retry"
            );
            set_ready_condition(&mut status, Some(&first));
            persist_status(ctx, add_on, &status).await?;
            ctx.store
                .set_annotation(
                    &add_on.name_any(),
                    CLEANUP_ATTEMPTS_ANNOTATION,
                    Some(attempts.to_string()),
                )
                .await?;
            return Err(first);
        }
        error!(
            cluster = %cluster,
            error = %first,
            attempts,
            "Cleanup abandoned after too many attempts, releasing add-on"
        );
    }

    ctx.index.clean_maps(&key);
    metrics::set_index_entries(ctx.index.reference_entries(), ctx.index.cluster_entries());
    release_finalizer(ctx, add_on).await?;
    ctx.forget(&key);
    info!("Add-on finalized");
    Ok(Action::await_change())
}
