//! Common test utilities for the reconciliation tests
//!
//! In-memory stand-ins for the management cluster, the EventReport cache and
//! the managed clusters, so whole reconciliation passes run without an API
//! server.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use event_manager::controller::deployer::{ApplyReport, OwnerKind, RenderedResource};
use event_manager::controller::fetcher::ObservedEventReport;
use event_manager::controller::reconciler::reconcile;
use event_manager::prelude::*;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::ObjectMeta;
use kube_runtime::controller::Action;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "default";

pub fn cluster(name: &str, labels: &[(&str, &str)]) -> ManagedCluster {
    ManagedCluster {
        reference: ClusterKey::new(ClusterType::Capi, NAMESPACE, name),
        labels: labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        paused: false,
    }
}

pub fn cluster_key(name: &str) -> ClusterKey {
    ClusterKey::new(ClusterType::Capi, NAMESPACE, name)
}

pub fn event_source(name: &str) -> EventSource {
    EventSource::new(
        name,
        EventSourceSpec {
            group: String::new(),
            version: "v1".into(),
            kind: "Service".into(),
            namespace: None,
            label_filters: vec![],
            script: None,
            collect_resources: false,
        },
    )
}

pub fn config_map_ref(name: &str) -> PolicyRef {
    PolicyRef {
        namespace: NAMESPACE.into(),
        name: name.into(),
        kind: ReferencedKind::ConfigMap,
        key: None,
    }
}

pub fn add_on(name: &str, selector: &str, event_source: &str, policy_refs: Vec<PolicyRef>) -> EventBasedAddOn {
    let mut add_on = EventBasedAddOn::new(
        name,
        EventBasedAddOnSpec {
            cluster_selector: selector.into(),
            event_source_name: event_source.into(),
            policy_refs,
            helm_charts: vec![],
        },
    );
    add_on.metadata.generation = Some(1);
    add_on
}

/// A NetworkPolicy per matching Service
pub const POLICY_TEMPLATE: &str = r"apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata:
  name: front-{{ .Cluster.name }}
  namespace: default
spec:
  podSelector: {}
  ingress:
  - from: []
";

pub fn matching(names: &[&str]) -> Vec<MatchingResource> {
    names
        .iter()
        .map(|name| MatchingResource {
            api_version: "v1".into(),
            kind: "Service".into(),
            namespace: NAMESPACE.into(),
            name: (*name).into(),
        })
        .collect()
}

/// Management cluster content
#[derive(Default)]
pub struct InMemoryStore {
    clusters: Mutex<Vec<ManagedCluster>>,
    config_maps: Mutex<BTreeMap<(String, String), ConfigMap>>,
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
    event_sources: Mutex<BTreeMap<String, EventSource>>,
    add_ons: Mutex<BTreeMap<String, EventBasedAddOn>>,
    pub status_writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn set_clusters(&self, clusters: Vec<ManagedCluster>) {
        *self.clusters.lock() = clusters;
    }

    pub fn put_config_map(&self, name: &str, data: &[(&str, &str)]) {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(NAMESPACE.into()),
                ..ObjectMeta::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..ConfigMap::default()
        };
        self.config_maps
            .lock()
            .insert((NAMESPACE.into(), name.into()), config_map);
    }

    pub fn delete_config_map(&self, name: &str) {
        self.config_maps.lock().remove(&(NAMESPACE.into(), name.into()));
    }

    pub fn put_event_source(&self, event_source: EventSource) {
        let name = event_source.metadata.name.clone().unwrap_or_default();
        self.event_sources.lock().insert(name, event_source);
    }

    pub fn put_add_on(&self, add_on: EventBasedAddOn) {
        let name = add_on.metadata.name.clone().unwrap_or_default();
        self.add_ons.lock().insert(name, add_on);
    }

    /// Apply a spec change, bumping the generation like the API server does
    pub fn update_spec(&self, name: &str, update: impl FnOnce(&mut EventBasedAddOnSpec)) {
        let mut add_ons = self.add_ons.lock();
        let add_on = add_ons.get_mut(name).expect("add-on exists");
        update(&mut add_on.spec);
        add_on.metadata.generation = Some(add_on.metadata.generation.unwrap_or(0) + 1);
    }

    pub fn request_deletion(&self, name: &str) {
        let mut add_ons = self.add_ons.lock();
        let add_on = add_ons.get_mut(name).expect("add-on exists");
        add_on.metadata.deletion_timestamp =
            Some(serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).expect("valid time"));
    }

    pub fn add_on(&self, name: &str) -> EventBasedAddOn {
        self.add_ons.lock().get(name).cloned().expect("add-on exists")
    }

    pub fn status(&self, name: &str) -> EventBasedAddOnStatus {
        self.add_on(name).status.unwrap_or_default()
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list_clusters(&self) -> Result<Vec<ManagedCluster>, AddOnError> {
        Ok(self.clusters.lock().clone())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, AddOnError> {
        Ok(self
            .config_maps
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, AddOnError> {
        Ok(self
            .secrets
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_event_source(&self, name: &str) -> Result<Option<EventSource>, AddOnError> {
        Ok(self.event_sources.lock().get(name).cloned())
    }

    async fn list_add_ons(&self) -> Result<Vec<EventBasedAddOn>, AddOnError> {
        Ok(self.add_ons.lock().values().cloned().collect())
    }

    async fn patch_status(&self, name: &str, status: &EventBasedAddOnStatus) -> Result<(), AddOnError> {
        if let Some(add_on) = self.add_ons.lock().get_mut(name) {
            add_on.status = Some(status.clone());
            self.status_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn set_finalizers(&self, name: &str, finalizers: Vec<String>) -> Result<(), AddOnError> {
        if let Some(add_on) = self.add_ons.lock().get_mut(name) {
            add_on.metadata.finalizers = (!finalizers.is_empty()).then_some(finalizers);
        }
        Ok(())
    }

    async fn set_annotation(&self, name: &str, key: &str, value: Option<String>) -> Result<(), AddOnError> {
        if let Some(add_on) = self.add_ons.lock().get_mut(name) {
            let annotations = add_on.metadata.annotations.get_or_insert_with(BTreeMap::new);
            match value {
                Some(value) => annotations.insert(key.to_string(), value),
                None => annotations.remove(key),
            };
        }
        Ok(())
    }
}

/// EventReports keyed by cluster and event source. A blocked fetcher never
/// answers, like a management cluster that stopped responding.
#[derive(Default)]
pub struct FakeFetcher {
    reports: Mutex<BTreeMap<(ClusterKey, String), ObservedEventReport>>,
    blocked: AtomicBool,
}

impl FakeFetcher {
    pub fn block(&self) {
        self.blocked.store(true, Ordering::SeqCst);
    }

    pub fn set_report(&self, cluster: &ClusterKey, event_source: &str, revision: &str, resources: Vec<MatchingResource>) {
        self.reports.lock().insert(
            (cluster.clone(), event_source.to_string()),
            ObservedEventReport {
                revision: revision.into(),
                matching_resources: resources,
                resources: None,
            },
        );
    }
}

#[async_trait]
impl EventReportFetcher for FakeFetcher {
    async fn fetch(&self, cluster: &ClusterKey, event_source: &str) -> Result<Option<ObservedEventReport>, AddOnError> {
        if self.blocked.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self
            .reports
            .lock()
            .get(&(cluster.clone(), event_source.to_string()))
            .cloned())
    }
}

/// One `apply` received by the fake applier
#[derive(Debug, Clone)]
pub struct ApplyCall {
    pub cluster: ClusterKey,
    pub owner: DeploymentOwner,
    pub resources: Vec<RenderedResource>,
}

/// Records every apply and removal and what is currently deployed.
/// Clusters in `unreachable` fail outright; clusters in `rejecting` refuse
/// every add-on manifest; with `hung_removals` no removal ever completes.
#[derive(Default)]
pub struct FakeApplier {
    applies: Mutex<Vec<ApplyCall>>,
    removals: Mutex<Vec<(ClusterKey, DeploymentOwner)>>,
    deployed: Mutex<BTreeSet<(ClusterKey, String)>>,
    unreachable: Mutex<BTreeSet<ClusterKey>>,
    rejecting: Mutex<BTreeSet<ClusterKey>>,
    hung_removals: AtomicBool,
}

impl FakeApplier {
    pub fn set_unreachable(&self, cluster: &ClusterKey, unreachable: bool) {
        let mut clusters = self.unreachable.lock();
        if unreachable {
            clusters.insert(cluster.clone());
        } else {
            clusters.remove(cluster);
        }
    }

    pub fn set_rejecting(&self, cluster: &ClusterKey, rejecting: bool) {
        let mut clusters = self.rejecting.lock();
        if rejecting {
            clusters.insert(cluster.clone());
        } else {
            clusters.remove(cluster);
        }
    }

    pub fn hang_removals(&self) {
        self.hung_removals.store(true, Ordering::SeqCst);
    }

    pub fn is_deployed(&self, cluster: &ClusterKey, owner: &DeploymentOwner) -> bool {
        self.deployed
            .lock()
            .contains(&(cluster.clone(), owner.to_string()))
    }

    pub fn add_on_applies(&self) -> Vec<ApplyCall> {
        self.applies
            .lock()
            .iter()
            .filter(|call| call.owner.kind == OwnerKind::AddOn)
            .cloned()
            .collect()
    }

    pub fn event_source_applies(&self) -> Vec<ApplyCall> {
        self.applies
            .lock()
            .iter()
            .filter(|call| call.owner.kind == OwnerKind::EventSource)
            .cloned()
            .collect()
    }

    pub fn removals(&self, kind: OwnerKind) -> Vec<ClusterKey> {
        self.removals
            .lock()
            .iter()
            .filter(|(_, owner)| owner.kind == kind)
            .map(|(cluster, _)| cluster.clone())
            .collect()
    }
}

#[async_trait]
impl ClusterApplier for FakeApplier {
    async fn apply(
        &self,
        cluster: &ClusterKey,
        owner: &DeploymentOwner,
        resources: &[RenderedResource],
    ) -> Result<ApplyReport, AddOnError> {
        if self.unreachable.lock().contains(cluster) {
            return Err(AddOnError::DeployFatal(format!("{cluster} unreachable")));
        }
        self.applies.lock().push(ApplyCall {
            cluster: cluster.clone(),
            owner: owner.clone(),
            resources: resources.to_vec(),
        });
        if owner.kind == OwnerKind::AddOn && self.rejecting.lock().contains(cluster) {
            let failures: Vec<String> = resources
                .iter()
                .filter_map(RenderedResource::identity)
                .map(|identity| format!("{identity}: admission webhook denied the request"))
                .collect();
            return Ok(ApplyReport {
                applied: resources.len() - failures.len(),
                failures,
                ..ApplyReport::default()
            });
        }
        self.deployed
            .lock()
            .insert((cluster.clone(), owner.to_string()));
        Ok(ApplyReport {
            applied: resources.len(),
            ..ApplyReport::default()
        })
    }

    async fn remove(&self, cluster: &ClusterKey, owner: &DeploymentOwner) -> Result<(), AddOnError> {
        if self.hung_removals.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unreachable.lock().contains(cluster) {
            return Err(AddOnError::DeployFatal(format!("{cluster} unreachable")));
        }
        self.removals.lock().push((cluster.clone(), owner.clone()));
        // nothing deployed is not an error
        self.deployed
            .lock()
            .remove(&(cluster.clone(), owner.to_string()));
        Ok(())
    }
}

/// A reconciler wired to the in-memory fakes
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub fetcher: Arc<FakeFetcher>,
    pub applier: Arc<FakeApplier>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let store = Arc::new(InMemoryStore::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let applier = Arc::new(FakeApplier::default());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&fetcher) as Arc<dyn EventReportFetcher>,
            Arc::clone(&applier) as Arc<dyn ClusterApplier>,
            Arc::new(DependencyIndex::new()),
            config,
            CancellationToken::new(),
        ));
        Self {
            store,
            fetcher,
            applier,
            reconciler,
        }
    }

    /// A second reconciler over the same store, with an empty index
    pub fn restarted(&self) -> Arc<Reconciler> {
        Arc::new(Reconciler::new(
            Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            Arc::clone(&self.fetcher) as Arc<dyn EventReportFetcher>,
            Arc::clone(&self.applier) as Arc<dyn ClusterApplier>,
            Arc::new(DependencyIndex::new()),
            ControllerConfig::default(),
            CancellationToken::new(),
        ))
    }

    /// Reconcile the stored version of `name`
    pub async fn reconcile(&self, name: &str) -> Result<Action, ReconcilerError> {
        reconcile(Arc::new(self.store.add_on(name)), Arc::clone(&self.reconciler)).await
    }
}

/// Two clusters (`c1` env=fv, `c2` env=prod), event source `es`, ConfigMap
/// `cm1` with a templated policy, and add-on `a` selecting `env=fv`
pub fn scenario() -> Harness {
    scenario_with(ControllerConfig::default())
}

pub fn scenario_with(config: ControllerConfig) -> Harness {
    let harness = Harness::with_config(config);
    harness.store.set_clusters(vec![
        cluster("c1", &[("env", "fv")]),
        cluster("c2", &[("env", "prod")]),
    ]);
    harness.store.put_event_source(event_source("es"));
    harness.store.put_config_map("cm1", &[("policy.yaml", POLICY_TEMPLATE)]);
    harness
        .store
        .put_add_on(add_on("a", "env=fv", "es", vec![config_map_ref("cm1")]));
    harness
}
