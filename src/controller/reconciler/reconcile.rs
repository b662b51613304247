//! # Reconciliation Entry Point
//!
//! Called by the controller runtime for every queued add-on. Serializes the
//! passes of one add-on, dispatches on its lifecycle phase, and bounds each
//! pass with a deadline.

use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};

use crate::controller::error::AddOnError;
use crate::controller::index::IndexEntry;
use crate::controller::keys::get_key_from_object;
use crate::controller::reconciler::finalize::{add_finalizer, finalize, LifecyclePhase};
use crate::controller::reconciler::process::process_event_based_add_on;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::resolver::reference_keys;
use crate::controller::selector::Selector;
use crate::crd::EventBasedAddOn;
use crate::observability::metrics;

/// Reconcile one add-on
///
/// # Errors
///
/// Returns a `ReconcilerError` the error policy turns into a backoff requeue.
pub async fn reconcile(
    add_on: Arc<EventBasedAddOn>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let key = get_key_from_object(add_on.as_ref());
    let span = info_span!(
        "reconcile",
        addon = %key,
        generation = add_on.metadata.generation.unwrap_or(0),
        resource_version = add_on.resource_version().unwrap_or_default().as_str(),
    );

    async move {
        let lock = ctx.key_lock(&key);
        let _guard = lock.lock().await;
        let start = Instant::now();
        metrics::increment_reconciliations();

        let cancel = ctx.shutdown.child_token();
        let deadline = cancel.clone();
        let timeout = ctx.config.reconcile_timeout();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            deadline.cancel();
        });

        let phase = LifecyclePhase::of(&add_on);
        debug!(?phase, "Reconciling add-on");
        let result = match phase {
            LifecyclePhase::Released => {
                ctx.index.clean_maps(&key);
                ctx.forget(&key);
                Ok(Action::await_change())
            }
            LifecyclePhase::Terminating => finalize(&ctx, &add_on, &cancel).await,
            LifecyclePhase::NeedsFinalizer => match add_finalizer(&ctx, &add_on).await {
                Ok(()) => process_event_based_add_on(&ctx, &add_on, &cancel).await,
                Err(e) => Err(e),
            },
            LifecyclePhase::Active => process_event_based_add_on(&ctx, &add_on, &cancel).await,
        };
        timer.abort();
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match result {
            Ok(action) => {
                if ctx.reset_backoff(&key) {
                    info!("Add-on recovered, backoff reset");
                }
                Ok(action)
            }
            Err(AddOnError::Cancelled) if ctx.shutdown.is_cancelled() => {
                debug!("Reconciliation interrupted by shutdown");
                Ok(Action::await_change())
            }
            Err(e) => Err(ReconcilerError::from(e)),
        }
    }
    .instrument(span)
    .await
}

/// Rebuild the DependencyIndex from scratch from every add-on in the store
///
/// # Errors
///
/// Returns the store error when add-ons cannot be listed.
pub async fn rebuild_index(ctx: &Reconciler) -> Result<usize, AddOnError> {
    let add_ons = ctx.store.list_add_ons().await?;
    let entries: Vec<IndexEntry> = add_ons
        .iter()
        .filter(|add_on| add_on.metadata.deletion_timestamp.is_none())
        .map(|add_on| IndexEntry {
            key: get_key_from_object(add_on),
            references: reference_keys(&add_on.spec),
            clusters: add_on
                .status
                .as_ref()
                .map(|s| s.matching_cluster_refs.iter().cloned().collect())
                .unwrap_or_default(),
            selector: Selector::parse(&add_on.spec.cluster_selector).ok(),
        })
        .collect();
    let count = entries.len();
    ctx.index.rebuild(entries);
    metrics::set_index_entries(ctx.index.reference_entries(), ctx.index.cluster_entries());
    info!(
        add_ons = count,
        references = ctx.index.reference_entries(),
        clusters = ctx.index.cluster_entries(),
        "Dependency index rebuilt"
    );
    Ok(count)
}
