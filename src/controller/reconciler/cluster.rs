//! # Per-Cluster Processing
//!
//! One matching cluster: fetch its EventReport, hash, and redeploy when the
//! digest differs from the one recorded in its ClusterInfo.

use std::collections::BTreeSet;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::controller::deployer::DeploymentOwner;
use crate::controller::error::AddOnError;
use crate::controller::hash;
use crate::controller::keys::AddOnKey;
use crate::controller::reconciler::event_sources::{deploy_event_source, remove_stale_event_sources};
use crate::controller::reconciler::status::ClusterUpdate;
use crate::controller::reconciler::types::Reconciler;
use crate::controller::resolver::ResolvedReferences;
use crate::controller::store::ManagedCluster;
use crate::crd::{ClusterInfo, EventBasedAddOnSpec};
use crate::observability::metrics;

/// Result of processing one cluster
#[derive(Debug)]
pub enum ClusterOutcome {
    /// Paused cluster, nothing attempted
    Paused,
    /// Digest matches the recorded one, nothing deployed
    Unchanged,
    Deployed { hash: String },
    Failed { error: AddOnError },
}

impl ClusterOutcome {
    /// Status update to record, `None` when the ClusterInfo stays as is
    #[must_use]
    pub fn status_update(&self) -> Option<ClusterUpdate> {
        match self {
            ClusterOutcome::Paused => Some(ClusterUpdate::Pending),
            ClusterOutcome::Unchanged => None,
            ClusterOutcome::Deployed { hash } => Some(ClusterUpdate::Provisioned { hash: hash.clone() }),
            ClusterOutcome::Failed { error } => Some(ClusterUpdate::Failed {
                message: error.to_string(),
            }),
        }
    }
}

/// Await `work` unless `cancel` fires first
///
/// # Errors
///
/// `Cancelled` when the token fires, otherwise the error of `work`.
pub async fn cancellable<T, F>(cancel: &CancellationToken, work: F) -> Result<T, AddOnError>
where
    F: Future<Output = Result<T, AddOnError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AddOnError::Cancelled),
        result = work => result,
    }
}

/// Inputs shared by every cluster of one pass
#[derive(Debug)]
pub struct ClusterWork<'a> {
    pub key: &'a AddOnKey,
    pub spec: &'a EventBasedAddOnSpec,
    pub references: &'a ResolvedReferences,
    /// Event sources this add-on stopped referencing
    pub stale_event_sources: &'a BTreeSet<String>,
    pub cancel: &'a CancellationToken,
}

/// Process one matching cluster
///
/// # Errors
///
/// Only `Cancelled`; every other failure is reported as
/// `ClusterOutcome::Failed` so other clusters are not affected.
pub async fn process_event_based_add_on_for_cluster(
    ctx: &Reconciler,
    work: &ClusterWork<'_>,
    cluster: &ManagedCluster,
    current: Option<&ClusterInfo>,
) -> Result<ClusterOutcome, AddOnError> {
    let span = info_span!("cluster", cluster = %cluster.reference);
    async move {
        if cluster.paused {
            debug!("Cluster is paused, skipping deployment");
            return Ok(ClusterOutcome::Paused);
        }
        match deploy_if_changed(ctx, work, cluster, current).await {
            Ok(outcome) => Ok(outcome),
            Err(AddOnError::Cancelled) => Err(AddOnError::Cancelled),
            Err(error) => {
                warn!(error = %error, "Cluster processing failed");
                metrics::increment_deployments("failed");
                Ok(ClusterOutcome::Failed { error })
            }
        }
    }
    .instrument(span)
    .await
}

async fn deploy_if_changed(
    ctx: &Reconciler,
    work: &ClusterWork<'_>,
    cluster: &ManagedCluster,
    current: Option<&ClusterInfo>,
) -> Result<ClusterOutcome, AddOnError> {
    let reference = &cluster.reference;
    let report = cancellable(
        work.cancel,
        ctx.fetcher.fetch(reference, &work.spec.event_source_name),
    )
    .await?;

    let digest = hash::hash(work.spec, work.references, report.as_ref())?;
    if current.and_then(|ci| ci.hash.as_deref()) == Some(digest.as_str()) {
        debug!(hash = %digest, "Content unchanged, not redeploying");
        metrics::increment_deployments("unchanged");
        return Ok(ClusterOutcome::Unchanged);
    }

    let rendered = ctx.engine.render(reference, work.references, report.as_ref())?;

    cancellable(
        work.cancel,
        deploy_event_source(ctx, reference, &work.references.event_source),
    )
    .await?;
    cancellable(
        work.cancel,
        ctx.engine
            .deploy(reference, &DeploymentOwner::add_on(work.key), &rendered),
    )
    .await?;

    // a failed removal fails the cluster so the next pass retries it
    if !work.stale_event_sources.is_empty() {
        remove_stale_event_sources(ctx, reference, work.stale_event_sources, work.key).await?;
    }

    info!(hash = %digest, resources = rendered.len(), "Add-on deployed");
    metrics::increment_deployments("deployed");
    Ok(ClusterOutcome::Deployed { hash: digest })
}
