//! # Add-on Processing
//!
//! One reconciliation pass of a live add-on:
//!
//! 1. Parse the selector and compute the matching clusters
//! 2. Update the DependencyIndex (one atomic edit)
//! 3. Remove the add-on from clusters that stopped matching
//! 4. Resolve references; on failure every matching cluster is marked Failed
//!    and nothing deployed is touched
//! 5. Process matching clusters in parallel
//! 6. Check the index against the outcome and resync it if they disagree
//! 7. Persist status

use futures::future::join_all;
use kube_runtime::controller::Action;
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::deployer::DeploymentOwner;
use crate::controller::error::AddOnError;
use crate::controller::keys::{get_key_from_object, AddOnKey, ClusterKey, ReferenceKey};
use crate::controller::reconciler::cluster::{
    cancellable, process_event_based_add_on_for_cluster, ClusterOutcome, ClusterWork,
};
use crate::controller::reconciler::event_sources::remove_stale_event_sources;
use crate::controller::reconciler::status::{
    persist_status, remove_cluster_info_entry, set_ready_condition, update_cluster_info,
    ClusterUpdate,
};
use crate::controller::reconciler::types::{Reconciler, TriggerSource};
use crate::controller::resolver::reference_keys;
use crate::controller::selector::{self, Selector};
use crate::controller::store::ManagedCluster;
use crate::crd::{EventBasedAddOn, ReferencedKind};
use crate::observability::metrics;

/// Run one pass for a live add-on
///
/// # Errors
///
/// Returns the first per-cluster error (after status has been written) so
/// the add-on is retried with backoff, or `Cancelled` when the pass was
/// cancelled before completing. Invalid selectors are not errors: they are
/// surfaced in status and the add-on waits for a spec change.
pub async fn process_event_based_add_on(
    ctx: &Reconciler,
    add_on: &EventBasedAddOn,
    cancel: &CancellationToken,
) -> Result<Action, AddOnError> {
    let key = get_key_from_object(add_on);
    let spec = &add_on.spec;
    let mut status = add_on.status.clone().unwrap_or_default();
    status.observed_generation = add_on.metadata.generation;

    let selector = match Selector::parse(&spec.cluster_selector) {
        Ok(selector) => selector,
        Err(error) => {
            warn!(error = %error, "Invalid cluster selector, waiting for a spec change");
            ctx.index.record_selector(&key, None);
            set_ready_condition(&mut status, Some(&error));
            persist_status(ctx, add_on, &status).await?;
            return Ok(Action::await_change());
        }
    };

    let clusters: BTreeMap<ClusterKey, ManagedCluster> =
        cancellable(cancel, ctx.store.list_clusters())
            .await?
            .into_iter()
            .map(|cluster| (cluster.reference.clone(), cluster))
            .collect();
    let known: Vec<ManagedCluster> = clusters.values().cloned().collect();
    let matching = selector::matches(&spec.cluster_selector, &known)?;

    if cancel.is_cancelled() {
        return Err(AddOnError::Cancelled);
    }

    let references = reference_keys(spec);
    ctx.index.record_selector(&key, Some(selector));
    let delta = ctx.index.update_maps(&key, &references, &matching);
    metrics::set_index_entries(ctx.index.reference_entries(), ctx.index.cluster_entries());
    if !delta.added_clusters.is_empty() || !delta.removed_clusters.is_empty() {
        info!(
            added = delta.added_clusters.len(),
            removed = delta.removed_clusters.len(),
            matching = matching.len(),
            "Matching clusters changed"
        );
    }

    let stale_event_sources: BTreeSet<String> = delta
        .removed_references
        .iter()
        .filter(|r| r.kind == ReferencedKind::EventSource)
        .map(|r| r.name.clone())
        .collect();

    // clusters that stopped matching
    let mut removable: BTreeSet<ClusterKey> = status
        .cluster_info
        .iter()
        .map(|ci| ci.cluster.clone())
        .chain(status.matching_cluster_refs.iter().cloned())
        .chain(delta.removed_clusters.iter().cloned())
        .collect();
    removable.retain(|cluster| ctx.index.is_cluster_entry_removed(&key, cluster));

    status.matching_cluster_refs = matching.iter().cloned().collect();
    let mut errors: Vec<AddOnError> = Vec::new();

    let mut removed_event_sources = stale_event_sources.clone();
    removed_event_sources.insert(spec.event_source_name.clone());
    let removals = removable.iter().map(|cluster| {
        let key = &key;
        let candidates = &removed_event_sources;
        async move {
            let result = cancellable(cancel, remove_from_cluster(ctx, key, cluster, candidates)).await;
            (cluster.clone(), result)
        }
    });
    for (cluster, result) in join_all(removals).await {
        match result {
            Ok(()) => {
                remove_cluster_info_entry(&mut status, &cluster);
            }
            Err(AddOnError::Cancelled) => return Err(AddOnError::Cancelled),
            Err(error) => {
                warn!(cluster = %cluster, error = %error, "Failed to remove add-on from cluster");
                update_cluster_info(
                    &mut status,
                    &cluster,
                    ClusterUpdate::Failed {
                        message: format!("removal failed: {error}"),
                    },
                );
                errors.push(error);
            }
        }
    }

    let resolved = match cancellable(cancel, ctx.resolver.resolve(spec)).await {
        Ok(resolved) => resolved,
        Err(AddOnError::Cancelled) => return Err(AddOnError::Cancelled),
        Err(error) => {
            warn!(error = %error, "Failed to resolve references");
            for cluster in &matching {
                update_cluster_info(
                    &mut status,
                    cluster,
                    ClusterUpdate::Failed {
                        message: error.to_string(),
                    },
                );
            }
            set_ready_condition(&mut status, Some(&error));
            persist_status(ctx, add_on, &status).await?;
            return Err(error);
        }
    };

    let work = ClusterWork {
        key: &key,
        spec,
        references: &resolved,
        stale_event_sources: &stale_event_sources,
        cancel,
    };
    let targets: Vec<&ManagedCluster> = matching.iter().filter_map(|c| clusters.get(c)).collect();
    let snapshot = status.clone();
    let deployments = targets.iter().map(|cluster| {
        let work = &work;
        let current = snapshot.cluster_info_for(&cluster.reference);
        async move {
            let outcome = process_event_based_add_on_for_cluster(ctx, work, cluster, current).await;
            (cluster.reference.clone(), outcome)
        }
    });
    let results = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(AddOnError::Cancelled),
        results = join_all(deployments) => results,
    };

    for (cluster, outcome) in results {
        let outcome = outcome?;
        if let Some(update) = outcome.status_update() {
            update_cluster_info(&mut status, &cluster, update);
        }
        if let ClusterOutcome::Failed { error } = outcome {
            errors.push(error);
        }
    }

    check_consistency(ctx, &key, &references, &matching);

    set_ready_condition(&mut status, errors.first());
    persist_status(ctx, add_on, &status).await?;

    match errors.into_iter().next() {
        Some(error) => Err(error),
        None => {
            debug!(clusters = matching.len(), "Add-on reconciled");
            metrics::increment_requeues(TriggerSource::Resync.as_str(), 1);
            Ok(Action::requeue(ctx.config.resync_interval()))
        }
    }
}

/// Remove everything `key` deployed in `cluster`, then the event sources no
/// add-on targeting the cluster still needs
///
/// # Errors
///
/// Returns the removal error of the engine.
pub async fn remove_from_cluster(
    ctx: &Reconciler,
    key: &AddOnKey,
    cluster: &ClusterKey,
    event_sources: &BTreeSet<String>,
) -> Result<(), AddOnError> {
    ctx.engine.remove(cluster, &DeploymentOwner::add_on(key)).await?;
    remove_stale_event_sources(ctx, cluster, event_sources, key).await
}

/// Every matching cluster must appear in the ClusterMap for `key` and the
/// forward and reverse maps must agree; otherwise the entry is rebuilt.
fn check_consistency(
    ctx: &Reconciler,
    key: &AddOnKey,
    references: &BTreeSet<ReferenceKey>,
    matching: &BTreeSet<ClusterKey>,
) {
    let clusters_tracked = matching
        .iter()
        .all(|cluster| ctx.index.get_cluster_map_for_entry(cluster).contains(key));
    if clusters_tracked && ctx.index.verify_consistency(key) {
        return;
    }
    warn!(addon = %key, "Dependency index inconsistent, resyncing entry");
    ctx.index.resync_entry(key, references, matching);
    metrics::increment_index_resyncs();
    metrics::set_index_entries(ctx.index.reference_entries(), ctx.index.cluster_entries());
}
