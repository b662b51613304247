//! # EventReport Collector
//!
//! Copies the EventReports produced in managed clusters into the management
//! cluster, where the reconciler reads them, and garbage-collects copies
//! whose EventSource or cluster is gone.
//!
//! Management-cluster copies live in the cluster namespace and are named
//! `<eventSource>--<clusterType>--<clusterName>`.

use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{
    CLUSTER_NAME_LABEL, CLUSTER_TYPE_LABEL, EVENT_SOURCE_NAME_LABEL, FIELD_MANAGER,
    LEDGER_NAMESPACE,
};
use crate::controller::deployer::ClusterConnector;
use crate::controller::error::{is_not_found, AddOnError};
use crate::controller::fetcher::event_report_name;
use crate::controller::index::DependencyIndex;
use crate::controller::keys::ClusterKey;
use crate::controller::store::ObjectStore;
use crate::crd::{EventReport, EventReportSpec, EventSource};
use crate::observability::metrics;

/// Labels identifying a collected report
fn report_labels(event_source: &str, cluster: &ClusterKey) -> BTreeMap<String, String> {
    BTreeMap::from([
        (EVENT_SOURCE_NAME_LABEL.to_string(), event_source.to_string()),
        (CLUSTER_NAME_LABEL.to_string(), cluster.name.clone()),
        (
            CLUSTER_TYPE_LABEL.to_string(),
            cluster.cluster_type.as_str().to_lowercase(),
        ),
    ])
}

/// Management-cluster copy of a report produced in `cluster`
#[must_use]
pub fn management_copy(report: &EventReport, cluster: &ClusterKey) -> EventReport {
    let event_source = report.spec.event_source_name.clone();
    EventReport {
        metadata: ObjectMeta {
            name: Some(event_report_name(&event_source, cluster)),
            namespace: Some(cluster.namespace.clone()),
            labels: Some(report_labels(&event_source, cluster)),
            ..Default::default()
        },
        spec: EventReportSpec {
            event_source_name: event_source,
            cluster_namespace: cluster.namespace.clone(),
            cluster_name: cluster.name.clone(),
            cluster_type: cluster.cluster_type,
            matching_resources: report.spec.matching_resources.clone(),
            resources: report.spec.resources.clone(),
        },
    }
}

/// Copy every EventReport of `cluster` into the management cluster and
/// delete copies whose source report no longer exists.
///
/// Returns the number of reports collected.
///
/// # Errors
///
/// `DeployFatal` when the managed cluster is unreachable, kube errors otherwise.
pub async fn collect_and_process_event_reports_from_cluster(
    management: &Client,
    connector: &ClusterConnector,
    cluster: &ClusterKey,
) -> Result<usize, AddOnError> {
    let remote_client = connector.client(cluster).await?;
    let remote: Api<EventReport> = Api::namespaced(remote_client, LEDGER_NAMESPACE);
    let local: Api<EventReport> = Api::namespaced(management.clone(), &cluster.namespace);

    let mut collected = BTreeSet::new();
    for report in remote.list(&ListParams::default()).await?.items {
        let copy = management_copy(&report, cluster);
        let name = copy.name_any();
        if report.metadata.deletion_timestamp.is_some() {
            delete_event_report(management, &copy).await?;
            continue;
        }
        let mut patch = serde_json::to_value(&copy)?;
        patch["apiVersion"] = serde_json::json!("lib.projectsveltos.io/v1alpha1");
        patch["kind"] = serde_json::json!("EventReport");
        local
            .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
            .await?;
        collected.insert(name);
    }

    let selector = format!(
        "{CLUSTER_NAME_LABEL}={},{CLUSTER_TYPE_LABEL}={}",
        cluster.name,
        cluster.cluster_type.as_str().to_lowercase()
    );
    for stale in local
        .list(&ListParams::default().labels(&selector))
        .await?
        .items
        .into_iter()
        .filter(|r| !collected.contains(&r.name_any()))
    {
        delete_event_report(management, &stale).await?;
    }

    metrics::increment_event_reports_collected(collected.len());
    Ok(collected.len())
}

/// Delete one collected report; a report already gone is not an error
///
/// # Errors
///
/// Kube errors other than not-found.
pub async fn delete_event_report(management: &Client, report: &EventReport) -> Result<(), AddOnError> {
    let namespace = report.namespace().unwrap_or_default();
    let api: Api<EventReport> = Api::namespaced(management.clone(), &namespace);
    match api.delete(&report.name_any(), &DeleteParams::default()).await {
        Ok(_) => {
            debug!(report = %report.name_any(), namespace = %namespace, "Deleted EventReport");
            Ok(())
        }
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(AddOnError::Kube(e)),
    }
}

/// Delete every collected report generated for `event_source`
///
/// # Errors
///
/// Kube errors other than not-found.
pub async fn remove_event_reports(management: &Client, event_source: &str) -> Result<(), AddOnError> {
    let api: Api<EventReport> = Api::all(management.clone());
    let params = ListParams::default().labels(&format!("{EVENT_SOURCE_NAME_LABEL}={event_source}"));
    for report in api.list(&params).await?.items {
        delete_event_report(management, &report).await?;
    }
    Ok(())
}

/// Delete every collected report coming from `cluster`
///
/// # Errors
///
/// Kube errors other than not-found.
pub async fn remove_event_reports_from_cluster(
    management: &Client,
    cluster: &ClusterKey,
) -> Result<(), AddOnError> {
    let api: Api<EventReport> = Api::namespaced(management.clone(), &cluster.namespace);
    let params = ListParams::default().labels(&format!(
        "{CLUSTER_NAME_LABEL}={},{CLUSTER_TYPE_LABEL}={}",
        cluster.name,
        cluster.cluster_type.as_str().to_lowercase()
    ));
    for report in api.list(&params).await?.items {
        delete_event_report(management, &report).await?;
    }
    Ok(())
}

/// Remove copies whose EventSource or cluster no longer exists
async fn garbage_collect(management: &Client, store: &dyn ObjectStore) -> Result<(), AddOnError> {
    let sources: BTreeSet<String> = Api::<EventSource>::all(management.clone())
        .list(&ListParams::default())
        .await?
        .items
        .iter()
        .map(ResourceExt::name_any)
        .collect();
    let clusters: BTreeSet<ClusterKey> = store
        .list_clusters()
        .await?
        .into_iter()
        .map(|c| c.reference)
        .collect();

    let reports = Api::<EventReport>::all(management.clone())
        .list(&ListParams::default().labels(EVENT_SOURCE_NAME_LABEL))
        .await?
        .items;

    let mut gone_sources = BTreeSet::new();
    let mut gone_clusters = BTreeSet::new();
    for report in &reports {
        if !sources.contains(&report.spec.event_source_name) {
            gone_sources.insert(report.spec.event_source_name.clone());
        }
        let cluster = ClusterKey::new(
            report.spec.cluster_type,
            &report.spec.cluster_namespace,
            &report.spec.cluster_name,
        );
        if !clusters.contains(&cluster) {
            gone_clusters.insert(cluster);
        }
    }

    for event_source in &gone_sources {
        info!(event_source = %event_source, "EventSource gone, removing its EventReports");
        remove_event_reports(management, event_source).await?;
    }
    for cluster in &gone_clusters {
        info!(cluster = %cluster, "Cluster gone, removing its EventReports");
        remove_event_reports_from_cluster(management, cluster).await?;
    }
    Ok(())
}

/// Periodically collect reports from every cluster targeted by an add-on
pub async fn run_collector(
    management: Client,
    connector: ClusterConnector,
    store: Arc<dyn ObjectStore>,
    index: Arc<DependencyIndex>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "Starting EventReport collector");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("EventReport collector stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        for cluster in index.all_clusters() {
            if let Err(e) =
                collect_and_process_event_reports_from_cluster(&management, &connector, &cluster).await
            {
                warn!(cluster = %cluster, error = %e, "Failed to collect EventReports");
            }
        }
        if let Err(e) = garbage_collect(&management, store.as_ref()).await {
            warn!(error = %e, "Failed to garbage-collect EventReports");
        }
    }
}
