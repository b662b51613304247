//! # Requeue Fan-out
//!
//! Maps changes of secondary objects to the add-ons that must be
//! reconciled again, using the DependencyIndex. Add-ons being finalized are
//! never requeued by these mappers.

use kube::ResourceExt;
use kube_runtime::reflector::ObjectRef;
use std::collections::BTreeSet;
use tracing::debug;

use crate::constants::CAPI_CLUSTER_NAME_LABEL;
use crate::controller::keys::{AddOnKey, ClusterKey, ReferenceKey};
use crate::controller::reconciler::types::{Reconciler, TriggerSource};
use crate::controller::store::ManagedCluster;
use crate::crd::{ClusterType, EventBasedAddOn, EventReport, Machine, ReferencedKind};
use crate::observability::metrics;

fn live(ctx: &Reconciler, keys: BTreeSet<AddOnKey>, trigger: TriggerSource) -> Vec<AddOnKey> {
    let keys: Vec<AddOnKey> = keys
        .into_iter()
        .filter(|key| !ctx.is_terminating(key))
        .collect();
    if !keys.is_empty() {
        debug!(trigger = trigger.as_str(), count = keys.len(), "Requeueing add-ons");
        metrics::increment_requeues(trigger.as_str(), keys.len());
    }
    keys
}

/// Add-ons targeting `cluster`, plus those whose selector matches its
/// current labels (the cluster may have just started matching)
#[must_use]
pub fn requeue_for_cluster(ctx: &Reconciler, cluster: &ManagedCluster) -> Vec<AddOnKey> {
    let mut keys = ctx.index.get_cluster_map_for_entry(&cluster.reference);
    keys.extend(ctx.index.add_ons_selecting(&cluster.labels));
    live(ctx, keys, TriggerSource::ClusterChange)
}

/// Add-ons targeting the CAPI cluster a machine belongs to
#[must_use]
pub fn requeue_for_machine(ctx: &Reconciler, machine: &Machine) -> Vec<AddOnKey> {
    let cluster_name = machine
        .labels()
        .get(CAPI_CLUSTER_NAME_LABEL)
        .cloned()
        .or_else(|| Some(machine.spec.cluster_name.clone()))
        .filter(|name| !name.is_empty());
    let Some(cluster_name) = cluster_name else {
        return Vec::new();
    };
    let cluster = ClusterKey::new(
        ClusterType::Capi,
        &machine.namespace().unwrap_or_default(),
        &cluster_name,
    );
    live(
        ctx,
        ctx.index.get_cluster_map_for_entry(&cluster),
        TriggerSource::MachineChange,
    )
}

/// Add-ons referencing the report's event source and targeting its cluster
#[must_use]
pub fn requeue_for_event_report(ctx: &Reconciler, report: &EventReport) -> Vec<AddOnKey> {
    let cluster = ClusterKey::new(
        report.spec.cluster_type,
        &report.spec.cluster_namespace,
        &report.spec.cluster_name,
    );
    let referencing = ctx
        .index
        .get_reference_map_for_entry(&ReferenceKey::event_source(&report.spec.event_source_name));
    let targeting = ctx.index.get_cluster_map_for_entry(&cluster);
    live(
        ctx,
        referencing.intersection(&targeting).cloned().collect(),
        TriggerSource::EventReportChange,
    )
}

/// Add-ons referencing a ConfigMap, Secret or EventSource
#[must_use]
pub fn requeue_for_reference(
    ctx: &Reconciler,
    kind: ReferencedKind,
    namespace: &str,
    name: &str,
) -> Vec<AddOnKey> {
    live(
        ctx,
        ctx.index
            .get_reference_map_for_entry(&ReferenceKey::new(kind, namespace, name)),
        TriggerSource::ReferenceChange,
    )
}

/// Object references the controller queue understands
#[must_use]
pub fn to_object_refs(keys: Vec<AddOnKey>) -> Vec<ObjectRef<EventBasedAddOn>> {
    keys.into_iter()
        .map(|key| match &key.namespace {
            Some(namespace) => ObjectRef::new(&key.name).within(namespace),
            None => ObjectRef::new(&key.name),
        })
        .collect()
}
