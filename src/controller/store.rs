//! # Object Store
//!
//! Read/write access to the management cluster used by the engine.
//!
//! The reconciler only talks to the API server through `ObjectStore`, so the
//! whole pipeline can run against an in-memory implementation in tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use crate::constants::FIELD_MANAGER;
use crate::controller::error::{is_conflict, is_not_found, AddOnError};
use crate::controller::keys::ClusterKey;
use crate::crd::{
    CapiCluster, ClusterType, EventBasedAddOn, EventBasedAddOnStatus, EventSource, SveltosCluster,
};

/// A cluster known to the management cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedCluster {
    pub reference: ClusterKey,
    pub labels: BTreeMap<String, String>,
    /// Paused clusters are matched but never deployed to
    pub paused: bool,
}

impl ManagedCluster {
    pub fn from_capi(cluster: &CapiCluster) -> Self {
        Self {
            reference: ClusterKey::new(
                ClusterType::Capi,
                &cluster.namespace().unwrap_or_default(),
                &cluster.name_any(),
            ),
            labels: cluster.labels().clone(),
            paused: cluster.spec.paused,
        }
    }

    pub fn from_sveltos(cluster: &SveltosCluster) -> Self {
        Self {
            reference: ClusterKey::new(
                ClusterType::Sveltos,
                &cluster.namespace().unwrap_or_default(),
                &cluster.name_any(),
            ),
            labels: cluster.labels().clone(),
            paused: cluster.spec.paused,
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All CAPI and Sveltos clusters
    async fn list_clusters(&self) -> Result<Vec<ManagedCluster>, AddOnError>;

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, AddOnError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, AddOnError>;

    async fn get_event_source(&self, name: &str) -> Result<Option<EventSource>, AddOnError>;

    async fn list_add_ons(&self) -> Result<Vec<EventBasedAddOn>, AddOnError>;

    /// Replace the status sub-resource of an add-on
    async fn patch_status(
        &self,
        name: &str,
        status: &EventBasedAddOnStatus,
    ) -> Result<(), AddOnError>;

    async fn set_finalizers(&self, name: &str, finalizers: Vec<String>) -> Result<(), AddOnError>;

    /// Set (`Some`) or remove (`None`) an annotation on an add-on
    async fn set_annotation(
        &self,
        name: &str,
        key: &str,
        value: Option<String>,
    ) -> Result<(), AddOnError>;
}

/// `ObjectStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn add_ons(&self) -> Api<EventBasedAddOn> {
        Api::all(self.client.clone())
    }
}

/// Listing a kind whose CRD is not installed yields no objects
async fn list_or_empty<K>(api: Api<K>) -> Result<Vec<K>, AddOnError>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.list(&ListParams::default()).await {
        Ok(list) => Ok(list.items),
        Err(e) if is_not_found(&e) => {
            debug!("{} not served by the API server, skipping", std::any::type_name::<K>());
            Ok(Vec::new())
        }
        Err(e) => Err(AddOnError::Kube(e)),
    }
}

fn map_write_error(name: &str, err: kube::Error) -> AddOnError {
    if is_conflict(&err) {
        AddOnError::StatusConflict(name.to_string())
    } else {
        AddOnError::Kube(err)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn list_clusters(&self) -> Result<Vec<ManagedCluster>, AddOnError> {
        let capi = list_or_empty(Api::<CapiCluster>::all(self.client.clone())).await?;
        let sveltos = list_or_empty(Api::<SveltosCluster>::all(self.client.clone())).await?;

        Ok(capi
            .iter()
            .map(ManagedCluster::from_capi)
            .chain(sveltos.iter().map(ManagedCluster::from_sveltos))
            .collect())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, AddOnError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, AddOnError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_event_source(&self, name: &str) -> Result<Option<EventSource>, AddOnError> {
        let api: Api<EventSource> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_add_ons(&self) -> Result<Vec<EventBasedAddOn>, AddOnError> {
        Ok(self.add_ons().list(&ListParams::default()).await?.items)
    }

    async fn patch_status(
        &self,
        name: &str,
        status: &EventBasedAddOnStatus,
    ) -> Result<(), AddOnError> {
        let patch = json!({ "status": status });
        self.add_ons()
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(|e| map_write_error(name, e))?;
        Ok(())
    }

    async fn set_finalizers(&self, name: &str, finalizers: Vec<String>) -> Result<(), AddOnError> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.add_ons()
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_write_error(name, e))?;
        Ok(())
    }

    async fn set_annotation(
        &self,
        name: &str,
        key: &str,
        value: Option<String>,
    ) -> Result<(), AddOnError> {
        // JSON merge patch: null removes the key
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        self.add_ons()
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_write_error(name, e))?;
        Ok(())
    }
}
