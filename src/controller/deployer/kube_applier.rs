//! # Kube Applier
//!
//! `ClusterApplier` talking to managed clusters directly.
//!
//! Manifests are applied with server-side apply. Each owner has a ledger
//! ConfigMap in the managed cluster listing what it deployed; pruning walks
//! the previous ledger and deletes entries absent from the new set, but only
//! when the live object still carries the owner's labels.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::{DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{self, ApiCapabilities, ApiResource, Scope};
use kube::{Api, Client, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::applier::{
    ApplyReport, ClusterApplier, DeploymentOwner, RenderedResource, ResourceIdentity,
};
use super::connector::{client_from_kubeconfig, ClusterConnector};
use super::helm::HelmRunner;
use crate::constants::{FIELD_MANAGER, LEDGER_NAMESPACE, OWNER_HASH_LABEL};
use crate::controller::error::{is_not_found, AddOnError};
use crate::controller::keys::ClusterKey;
use crate::crd::HelmChartAction;

const LEDGER_KEY: &str = "ledger";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
struct ReleaseRef {
    namespace: String,
    name: String,
}

/// What an owner deployed in a cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Ledger {
    #[serde(default)]
    resources: BTreeSet<ResourceIdentity>,
    #[serde(default)]
    releases: BTreeSet<ReleaseRef>,
}

pub struct KubeApplier {
    connector: ClusterConnector,
    helm: HelmRunner,
}

impl KubeApplier {
    #[must_use]
    pub fn new(connector: ClusterConnector, helm: HelmRunner) -> Self {
        Self { connector, helm }
    }
}

fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

async fn resolve_api(
    client: &Client,
    identity: &ResourceIdentity,
) -> Result<(ApiResource, ApiCapabilities), kube::Error> {
    let (group, version) = split_api_version(&identity.api_version);
    let gvk = GroupVersionKind::gvk(group, version, &identity.kind);
    discovery::pinned_kind(client, &gvk).await
}

fn dynamic_api(
    client: &Client,
    resource: &ApiResource,
    capabilities: &ApiCapabilities,
    namespace: &str,
) -> Api<DynamicObject> {
    if capabilities.scope == Scope::Namespaced {
        let namespace = if namespace.is_empty() { "default" } else { namespace };
        Api::namespaced_with(client.clone(), namespace, resource)
    } else {
        Api::all_with(client.clone(), resource)
    }
}

async fn apply_manifest(
    client: &Client,
    owner: &DeploymentOwner,
    identity: &ResourceIdentity,
    manifest: &serde_json::Value,
) -> Result<(), String> {
    let (resource, capabilities) = resolve_api(client, identity)
        .await
        .map_err(|e| format!("{identity}: {e}"))?;
    let mut object: DynamicObject =
        serde_json::from_value(manifest.clone()).map_err(|e| format!("{identity}: {e}"))?;
    let labels = object.labels_mut();
    for (key, value) in owner.labels() {
        labels.insert(key.to_string(), value);
    }

    let api = dynamic_api(client, &resource, &capabilities, &identity.namespace);
    api.patch(
        &identity.name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&object),
    )
    .await
    .map_err(|e| format!("{identity}: {e}"))?;
    Ok(())
}

/// Delete `identity` if it still belongs to `owner`. Returns `true` when deleted.
async fn delete_owned(
    client: &Client,
    owner: &DeploymentOwner,
    identity: &ResourceIdentity,
) -> Result<bool, String> {
    let (resource, capabilities) = match resolve_api(client, identity).await {
        Ok(found) => found,
        // kind no longer served, nothing left to delete
        Err(e) if is_not_found(&e) => return Ok(false),
        Err(e) => return Err(format!("{identity}: {e}")),
    };
    let api = dynamic_api(client, &resource, &capabilities, &identity.namespace);
    let Some(live) = api
        .get_opt(&identity.name)
        .await
        .map_err(|e| format!("{identity}: {e}"))?
    else {
        return Ok(false);
    };
    if live.labels().get(OWNER_HASH_LABEL) != Some(&owner.label_hash()) {
        debug!(resource = %identity, owner = %owner, "Not deleting resource owned by someone else");
        return Ok(false);
    }
    match api.delete(&identity.name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(format!("{identity}: {e}")),
    }
}

async fn load_ledger(client: &Client, owner: &DeploymentOwner) -> Result<Option<Ledger>, AddOnError> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), LEDGER_NAMESPACE);
    let Some(config_map) = api.get_opt(&owner.ledger_name()).await? else {
        return Ok(None);
    };
    let ledger = config_map
        .data
        .and_then(|mut data| data.remove(LEDGER_KEY))
        .map(|text| serde_json::from_str::<Ledger>(&text))
        .transpose()?
        .unwrap_or_default();
    Ok(Some(ledger))
}

async fn save_ledger(client: &Client, owner: &DeploymentOwner, ledger: &Ledger) -> Result<(), AddOnError> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let namespace = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": LEDGER_NAMESPACE },
    });
    namespaces
        .patch(LEDGER_NAMESPACE, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&namespace))
        .await?;

    let labels: BTreeMap<String, String> = owner
        .labels()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let config_map = serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": owner.ledger_name(),
            "namespace": LEDGER_NAMESPACE,
            "labels": labels,
            "annotations": { "projectsveltos.io/owner": owner.to_string() },
        },
        "data": { LEDGER_KEY: serde_json::to_string(ledger)? },
    });
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), LEDGER_NAMESPACE);
    api.patch(
        &owner.ledger_name(),
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&config_map),
    )
    .await?;
    Ok(())
}

#[async_trait]
impl ClusterApplier for KubeApplier {
    async fn apply(
        &self,
        cluster: &ClusterKey,
        owner: &DeploymentOwner,
        resources: &[RenderedResource],
    ) -> Result<ApplyReport, AddOnError> {
        let kubeconfig = self.connector.kubeconfig(cluster).await?.ok_or_else(|| {
            AddOnError::DeployFatal(format!("kubeconfig for cluster {cluster} not found"))
        })?;
        let client = client_from_kubeconfig(&kubeconfig).await?;
        let previous = load_ledger(&client, owner).await?.unwrap_or_default();

        let mut report = ApplyReport::default();
        let mut desired = Ledger::default();

        for resource in resources {
            match resource {
                RenderedResource::Manifest(manifest) => {
                    let Some(identity) = resource.identity() else {
                        report.failures.push("manifest without identity".to_string());
                        continue;
                    };
                    // kept in the ledger even when rejected so a later pass can prune it
                    desired.resources.insert(identity.clone());
                    match apply_manifest(&client, owner, &identity, manifest).await {
                        Ok(()) => report.applied += 1,
                        Err(failure) => report.failures.push(failure),
                    }
                }
                RenderedResource::Chart(rendered) => {
                    let chart = &rendered.chart;
                    let result = match chart.helm_chart_action {
                        HelmChartAction::Install => {
                            desired.releases.insert(ReleaseRef {
                                namespace: chart.release_namespace.clone(),
                                name: chart.release_name.clone(),
                            });
                            self.helm
                                .upgrade_install(&kubeconfig, chart, rendered.values.as_deref())
                                .await
                        }
                        HelmChartAction::Uninstall => {
                            self.helm
                                .uninstall(&kubeconfig, &chart.release_namespace, &chart.release_name)
                                .await
                        }
                    };
                    match result {
                        Ok(()) => report.applied += 1,
                        Err(e) => report.failures.push(format!(
                            "release {}/{}: {e}",
                            chart.release_namespace, chart.release_name
                        )),
                    }
                }
            }
        }

        let stale_resources: Vec<ResourceIdentity> = previous
            .resources
            .difference(&desired.resources)
            .cloned()
            .collect();
        for stale in &stale_resources {
            match delete_owned(&client, owner, stale).await {
                Ok(true) => report.pruned += 1,
                Ok(false) => {}
                Err(failure) => {
                    // retry the prune on the next pass
                    desired.resources.insert(stale.clone());
                    report.failures.push(failure);
                }
            }
        }
        let stale_releases: Vec<ReleaseRef> = previous
            .releases
            .difference(&desired.releases)
            .cloned()
            .collect();
        for stale in &stale_releases {
            match self.helm.uninstall(&kubeconfig, &stale.namespace, &stale.name).await {
                Ok(()) => report.pruned += 1,
                Err(e) => {
                    desired.releases.insert(stale.clone());
                    report
                        .failures
                        .push(format!("release {}/{}: {e}", stale.namespace, stale.name));
                }
            }
        }

        save_ledger(&client, owner, &desired).await?;
        Ok(report)
    }

    async fn remove(&self, cluster: &ClusterKey, owner: &DeploymentOwner) -> Result<(), AddOnError> {
        let Some(kubeconfig) = self.connector.kubeconfig(cluster).await? else {
            info!(cluster = %cluster, owner = %owner, "Cluster kubeconfig gone, nothing to remove");
            return Ok(());
        };
        let client = client_from_kubeconfig(&kubeconfig).await?;
        let Some(ledger) = load_ledger(&client, owner).await? else {
            return Ok(());
        };

        let mut failures = Vec::new();
        for identity in &ledger.resources {
            if let Err(failure) = delete_owned(&client, owner, identity).await {
                failures.push(failure);
            }
        }
        for release in &ledger.releases {
            if let Err(e) = self.helm.uninstall(&kubeconfig, &release.namespace, &release.name).await {
                failures.push(format!("release {}/{}: {e}", release.namespace, release.name));
            }
        }
        if !failures.is_empty() {
            warn!(cluster = %cluster, owner = %owner, failed = failures.len(), "Removal incomplete");
            return Err(AddOnError::DeployPartialFailure { failures });
        }

        let api: Api<ConfigMap> = Api::namespaced(client, LEDGER_NAMESPACE);
        match api.delete(&owner.ledger_name(), &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(AddOnError::Kube(e)),
        }
    }
}
