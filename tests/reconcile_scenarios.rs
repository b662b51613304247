//! # Reconciliation Scenarios
//!
//! Full reconciliation passes against in-memory fakes:
//! - initial deployment and status
//! - selector changes moving the add-on between clusters
//! - EventReport changes, with and without content changes
//! - missing references
//! - idempotence, paused, unreachable and rejecting clusters
//! - the pass deadline
//! - finalization and the index rebuild after a restart

mod common;

use common::*;
use event_manager::controller::deployer::{OwnerKind, RenderedResource};
use event_manager::controller::reconciler::{
    cleanup_attempts, rebuild_index, remove_from_cluster, requeue_for_cluster,
    requeue_for_event_report, requeue_for_reference, READY_CONDITION,
};
use event_manager::prelude::*;
use kube_runtime::controller::Action;
use std::collections::BTreeSet;

fn short_deadline() -> ControllerConfig {
    ControllerConfig {
        reconcile_timeout_secs: 1,
        ..ControllerConfig::default()
    }
}

fn manifest_names(call: &ApplyCall) -> BTreeSet<String> {
    call.resources
        .iter()
        .filter_map(RenderedResource::identity)
        .map(|identity| identity.name)
        .collect()
}

fn ready(status: &EventBasedAddOnStatus) -> (String, Option<String>) {
    let condition = status
        .conditions
        .iter()
        .find(|c| c.r#type == READY_CONDITION)
        .expect("Ready condition is set");
    (condition.status.clone(), condition.reason.clone())
}

#[tokio::test]
async fn test_initial_deployment_provisions_matching_cluster() {
    let harness = scenario();

    let action = harness.reconcile("a").await.expect("reconcile succeeds");
    assert_eq!(
        action,
        Action::requeue(harness.reconciler.config.resync_interval())
    );

    let add_on = harness.store.add_on("a");
    assert!(add_on
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == EVENT_BASED_ADD_ON_FINALIZER)));

    let status = harness.store.status("a");
    assert_eq!(status.matching_cluster_refs, vec![cluster_key("c1")]);
    assert_eq!(status.cluster_info.len(), 1);
    let info = &status.cluster_info[0];
    assert_eq!(info.cluster, cluster_key("c1"));
    assert_eq!(info.status, FeatureStatus::Provisioned);
    assert!(info.hash.is_some());
    assert!(info.last_applied_time.is_some());
    assert_eq!(ready(&status).0, "True");

    let applies = harness.applier.add_on_applies();
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].cluster, cluster_key("c1"));
    let RenderedResource::Manifest(manifest) = &applies[0].resources[0] else {
        panic!("expected a manifest");
    };
    assert_eq!(manifest["metadata"]["name"], "front-c1");

    let event_sources = harness.applier.event_source_applies();
    assert_eq!(event_sources.len(), 1);
    assert_eq!(event_sources[0].cluster, cluster_key("c1"));
}

#[tokio::test]
async fn test_selector_change_moves_add_on_between_clusters() {
    let harness = scenario();
    harness.reconcile("a").await.expect("first pass");

    harness
        .store
        .update_spec("a", |spec| spec.cluster_selector = "env=prod".into());
    harness.reconcile("a").await.expect("second pass");

    assert_eq!(harness.applier.removals(OwnerKind::AddOn), vec![cluster_key("c1")]);
    // no other add-on uses `es` in c1
    assert_eq!(
        harness.applier.removals(OwnerKind::EventSource),
        vec![cluster_key("c1")]
    );

    let applies = harness.applier.add_on_applies();
    assert_eq!(applies.len(), 2);
    assert_eq!(applies[1].cluster, cluster_key("c2"));

    let status = harness.store.status("a");
    assert_eq!(status.matching_cluster_refs, vec![cluster_key("c2")]);
    let clusters: Vec<&ClusterKey> = status.cluster_info.iter().map(|ci| &ci.cluster).collect();
    assert_eq!(clusters, vec![&cluster_key("c2")]);
    assert_eq!(status.observed_generation, Some(2));

    let key = AddOnKey::cluster_scoped("a");
    assert!(harness
        .reconciler
        .index
        .get_cluster_map_for_entry(&cluster_key("c1"))
        .is_empty());
    assert!(harness
        .reconciler
        .index
        .get_cluster_map_for_entry(&cluster_key("c2"))
        .contains(&key));
}

#[tokio::test]
async fn test_report_revision_alone_does_not_redeploy() {
    let harness = scenario();
    harness
        .fetcher
        .set_report(&cluster_key("c1"), "es", "1", matching(&["nginx"]));
    harness.reconcile("a").await.expect("first pass");
    assert_eq!(harness.applier.add_on_applies().len(), 1);
    let first_hash = harness.store.status("a").cluster_info[0].hash.clone();

    // rewritten with identical content
    harness
        .fetcher
        .set_report(&cluster_key("c1"), "es", "2", matching(&["nginx"]));
    harness.reconcile("a").await.expect("second pass");
    assert_eq!(harness.applier.add_on_applies().len(), 1);
    assert_eq!(harness.store.status("a").cluster_info[0].hash, first_hash);

    harness
        .fetcher
        .set_report(&cluster_key("c1"), "es", "3", matching(&["nginx", "haproxy"]));
    harness.reconcile("a").await.expect("third pass");
    assert_eq!(harness.applier.add_on_applies().len(), 2);
    assert_ne!(harness.store.status("a").cluster_info[0].hash, first_hash);
}

#[tokio::test]
async fn test_missing_reference_fails_without_touching_clusters() {
    let harness = scenario();
    harness.reconcile("a").await.expect("first pass");

    harness.store.delete_config_map("cm1");
    let result = harness.reconcile("a").await;
    assert!(result.is_err());

    let status = harness.store.status("a");
    let info = &status.cluster_info[0];
    assert_eq!(info.status, FeatureStatus::Failed);
    assert!(info.hash.is_none());
    assert!(info
        .failure_message
        .as_deref()
        .is_some_and(|m| m.contains("cm1")));
    assert_eq!(
        ready(&status),
        ("False".to_string(), Some("ReferenceNotFound".to_string()))
    );

    assert_eq!(harness.applier.add_on_applies().len(), 1);
    assert!(harness.applier.removals(OwnerKind::AddOn).is_empty());

    // restoring the ConfigMap redeploys since the hash was cleared
    harness
        .store
        .put_config_map("cm1", &[("policy.yaml", POLICY_TEMPLATE)]);
    harness.reconcile("a").await.expect("recovered");
    assert_eq!(harness.applier.add_on_applies().len(), 2);
    assert_eq!(
        harness.store.status("a").cluster_info[0].status,
        FeatureStatus::Provisioned
    );
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let harness = scenario();
    harness.reconcile("a").await.expect("first pass");
    let status = harness.store.status("a");
    let writes = harness.store.status_writes();

    harness.reconcile("a").await.expect("second pass");

    assert_eq!(harness.applier.add_on_applies().len(), 1);
    assert_eq!(harness.store.status("a"), status);
    assert_eq!(harness.store.status_writes(), writes);
}

#[tokio::test]
async fn test_invalid_selector_waits_for_spec_change() {
    let harness = scenario();
    harness
        .store
        .update_spec("a", |spec| spec.cluster_selector = "env in (fv".into());

    let action = harness.reconcile("a").await.expect("not retried");
    assert_eq!(action, Action::await_change());

    let status = harness.store.status("a");
    assert_eq!(ready(&status).1.as_deref(), Some("SelectorInvalid"));
    assert!(harness.applier.add_on_applies().is_empty());
}

#[tokio::test]
async fn test_paused_cluster_is_tracked_but_not_deployed() {
    let harness = scenario();
    let mut paused = cluster("c1", &[("env", "fv")]);
    paused.paused = true;
    harness.store.set_clusters(vec![paused]);

    harness.reconcile("a").await.expect("reconcile succeeds");

    assert!(harness.applier.add_on_applies().is_empty());
    let status = harness.store.status("a");
    assert_eq!(status.matching_cluster_refs, vec![cluster_key("c1")]);
    assert_eq!(status.cluster_info[0].status, FeatureStatus::Provisioning);
    assert_eq!(ready(&status).0, "False");
}

#[tokio::test]
async fn test_unreachable_cluster_does_not_block_others() {
    let harness = scenario();
    harness.store.set_clusters(vec![
        cluster("c1", &[("env", "fv")]),
        cluster("c3", &[("env", "fv")]),
    ]);
    harness.applier.set_unreachable(&cluster_key("c1"), true);

    let result = harness.reconcile("a").await;
    assert!(result.is_err());

    let status = harness.store.status("a");
    let c1 = status.cluster_info_for(&cluster_key("c1")).expect("c1 info");
    let c3 = status.cluster_info_for(&cluster_key("c3")).expect("c3 info");
    assert_eq!(c1.status, FeatureStatus::Failed);
    assert_eq!(c3.status, FeatureStatus::Provisioned);

    harness.applier.set_unreachable(&cluster_key("c1"), false);
    harness.reconcile("a").await.expect("recovered");
    let status = harness.store.status("a");
    assert!(status
        .cluster_info
        .iter()
        .all(|ci| ci.status == FeatureStatus::Provisioned));
    // c3 was not redeployed
    let c3_applies = harness
        .applier
        .add_on_applies()
        .iter()
        .filter(|call| call.cluster == cluster_key("c3"))
        .count();
    assert_eq!(c3_applies, 1);
}

#[tokio::test]
async fn test_requeue_mappers_find_dependent_add_ons() {
    let harness = scenario();
    harness.reconcile("a").await.expect("first pass");
    let ctx = &harness.reconciler;
    let key = AddOnKey::cluster_scoped("a");

    assert_eq!(
        requeue_for_reference(ctx, ReferencedKind::ConfigMap, NAMESPACE, "cm1"),
        vec![key.clone()]
    );
    assert!(requeue_for_reference(ctx, ReferencedKind::ConfigMap, NAMESPACE, "other").is_empty());

    // c2 starts matching once relabeled
    let relabeled = cluster("c2", &[("env", "fv")]);
    assert_eq!(requeue_for_cluster(ctx, &relabeled), vec![key.clone()]);

    let mut report = EventReport::new(
        "es--capi--c1",
        EventReportSpec {
            event_source_name: "es".into(),
            cluster_namespace: NAMESPACE.into(),
            cluster_name: "c1".into(),
            cluster_type: ClusterType::Capi,
            matching_resources: matching(&["nginx"]),
            resources: None,
        },
    );
    report.metadata.namespace = Some(NAMESPACE.into());
    assert_eq!(requeue_for_event_report(ctx, &report), vec![key]);

    report.spec.cluster_name = "c2".into();
    assert!(requeue_for_event_report(ctx, &report).is_empty());
}

#[tokio::test]
async fn test_deletion_removes_everything_and_releases_finalizer() {
    let harness = scenario();
    harness.reconcile("a").await.expect("first pass");

    harness.store.request_deletion("a");
    let action = harness.reconcile("a").await.expect("finalized");
    assert_eq!(action, Action::await_change());

    assert_eq!(harness.applier.removals(OwnerKind::AddOn), vec![cluster_key("c1")]);
    assert_eq!(
        harness.applier.removals(OwnerKind::EventSource),
        vec![cluster_key("c1")]
    );
    assert!(harness.store.add_on("a").metadata.finalizers.is_none());

    let key = AddOnKey::cluster_scoped("a");
    let index = &harness.reconciler.index;
    assert!(index.tracked_clusters(&key).is_empty());
    assert!(index.tracked_references(&key).is_empty());
    assert!(index
        .get_reference_map_for_entry(&ReferenceKey::event_source("es"))
        .is_empty());
}

#[tokio::test]
async fn test_cleanup_is_abandoned_after_max_attempts() {
    let config = ControllerConfig {
        max_cleanup_attempts: 2,
        ..ControllerConfig::default()
    };
    let harness = scenario_with(config);
    harness.reconcile("a").await.expect("first pass");

    harness.applier.set_unreachable(&cluster_key("c1"), true);
    harness.store.request_deletion("a");

    assert!(harness.reconcile("a").await.is_err());
    assert!(harness.store.add_on("a").metadata.finalizers.is_some());

    harness.reconcile("a").await.expect("cleanup abandoned");
    assert!(harness.store.add_on("a").metadata.finalizers.is_none());
}

#[tokio::test]
async fn test_index_rebuilt_from_persisted_status() {
    let harness = scenario();
    harness.reconcile("a").await.expect("first pass");

    let restarted = harness.restarted();
    let count = rebuild_index(&restarted).await.expect("rebuild");
    assert_eq!(count, 1);

    let key = AddOnKey::cluster_scoped("a");
    assert_eq!(
        restarted.index.tracked_clusters(&key),
        BTreeSet::from([cluster_key("c1")])
    );
    assert!(restarted
        .index
        .get_reference_map_for_entry(&ReferenceKey::new(ReferencedKind::ConfigMap, NAMESPACE, "cm1"))
        .contains(&key));
    // selector restored, so label changes still map to the add-on
    let relabeled = cluster("c2", &[("env", "fv")]);
    assert_eq!(requeue_for_cluster(&restarted, &relabeled), vec![key]);
}

#[tokio::test]
async fn test_shared_event_source_kept_while_in_use() {
    let harness = scenario();
    harness
        .store
        .put_add_on(add_on("b", "env=fv", "es", vec![config_map_ref("cm1")]));
    harness.reconcile("a").await.expect("a deployed");
    harness.reconcile("b").await.expect("b deployed");

    harness
        .store
        .update_spec("a", |spec| spec.cluster_selector = "env=prod".into());
    harness.reconcile("a").await.expect("a moved");

    assert_eq!(harness.applier.removals(OwnerKind::AddOn), vec![cluster_key("c1")]);
    // `b` still needs `es` in c1
    assert!(harness.applier.removals(OwnerKind::EventSource).is_empty());
}

#[tokio::test]
async fn test_keyed_refs_to_one_config_map_deploy_every_key() {
    let harness = scenario();
    let second = POLICY_TEMPLATE.replace("front-", "back-");
    harness.store.put_config_map(
        "cm1",
        &[("front.yaml", POLICY_TEMPLATE), ("back.yaml", second.as_str())],
    );
    let keyed = |key: &str| PolicyRef {
        key: Some(key.into()),
        ..config_map_ref("cm1")
    };
    harness
        .store
        .update_spec("a", |spec| spec.policy_refs = vec![keyed("front.yaml"), keyed("back.yaml")]);

    harness.reconcile("a").await.expect("reconcile succeeds");

    let applies = harness.applier.add_on_applies();
    assert_eq!(applies.len(), 1);
    assert_eq!(
        manifest_names(&applies[0]),
        BTreeSet::from(["front-c1".to_string(), "back-c1".to_string()])
    );
}

#[tokio::test]
async fn test_rejected_resources_are_reported_per_resource() {
    let harness = scenario();
    harness.applier.set_rejecting(&cluster_key("c1"), true);

    let Err(error) = harness.reconcile("a").await else {
        panic!("rejected manifests must fail the pass");
    };
    assert_eq!(error.reason(), "DeployPartialFailure");

    let status = harness.store.status("a");
    let info = status.cluster_info_for(&cluster_key("c1")).expect("c1 info");
    assert_eq!(info.status, FeatureStatus::Failed);
    assert!(info.hash.is_none());
    let message = info.failure_message.as_deref().unwrap_or_default();
    assert!(message.contains("NetworkPolicy default/front-c1"), "{message}");
    assert!(message.contains("admission webhook denied"), "{message}");
    assert_eq!(
        ready(&status),
        ("False".to_string(), Some("DeployPartialFailure".to_string()))
    );

    harness.applier.set_rejecting(&cluster_key("c1"), false);
    harness.reconcile("a").await.expect("recovered");
    assert_eq!(
        harness.store.status("a").cluster_info[0].status,
        FeatureStatus::Provisioned
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_pass_without_writing_status() {
    let harness = scenario_with(short_deadline());
    harness.fetcher.block();

    let Err(error) = harness.reconcile("a").await else {
        panic!("a pass past its deadline must fail");
    };
    assert_eq!(error.reason(), "Cancelled");

    assert_eq!(harness.store.status_writes(), 0);
    assert!(harness.store.add_on("a").status.is_none());
    assert!(harness.applier.add_on_applies().is_empty());
    assert!(harness.applier.event_source_applies().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hung_cleanup_counts_as_failed_attempt() {
    let harness = scenario_with(short_deadline());
    harness.reconcile("a").await.expect("first pass");

    harness.applier.hang_removals();
    harness.store.request_deletion("a");

    let Err(error) = harness.reconcile("a").await else {
        panic!("cleanup past the deadline must fail");
    };
    assert_eq!(error.reason(), "Cancelled");

    let add_on = harness.store.add_on("a");
    assert_eq!(cleanup_attempts(&add_on), 1);
    assert!(add_on.metadata.finalizers.is_some());
    let info = harness
        .store
        .status("a")
        .cluster_info_for(&cluster_key("c1"))
        .cloned()
        .expect("c1 still blocks deletion");
    assert_eq!(info.status, FeatureStatus::Failed);
}

#[tokio::test]
async fn test_failed_cleanup_keeps_only_blocking_clusters_in_status() {
    let harness = scenario();
    harness.store.set_clusters(vec![
        cluster("c1", &[("env", "fv")]),
        cluster("c3", &[("env", "fv")]),
    ]);
    harness.reconcile("a").await.expect("first pass");
    assert_eq!(harness.store.status("a").cluster_info.len(), 2);

    harness.applier.set_unreachable(&cluster_key("c3"), true);
    harness.store.request_deletion("a");
    assert!(harness.reconcile("a").await.is_err());

    let status = harness.store.status("a");
    assert!(status.cluster_info_for(&cluster_key("c1")).is_none());
    let c3 = status.cluster_info_for(&cluster_key("c3")).expect("c3 info");
    assert_eq!(c3.status, FeatureStatus::Failed);
    assert!(c3
        .failure_message
        .as_deref()
        .is_some_and(|m| m.starts_with("removal failed")));
    assert_eq!(ready(&status).1.as_deref(), Some("DeployFatal"));
}

#[tokio::test]
async fn test_removing_absent_resources_succeeds() {
    let harness = scenario();
    harness.reconcile("a").await.expect("first pass");
    let key = AddOnKey::cluster_scoped("a");
    let owner = DeploymentOwner::add_on(&key);
    assert!(harness.applier.is_deployed(&cluster_key("c1"), &owner));

    harness.store.request_deletion("a");
    harness.reconcile("a").await.expect("finalized");
    assert!(!harness.applier.is_deployed(&cluster_key("c1"), &owner));

    let event_sources = BTreeSet::from(["es".to_string()]);
    for cluster in [cluster_key("c1"), cluster_key("c2")] {
        remove_from_cluster(&harness.reconciler, &key, &cluster, &event_sources)
            .await
            .expect("nothing left to remove is not an error");
    }
    assert_eq!(harness.applier.removals(OwnerKind::AddOn).len(), 3);
}
