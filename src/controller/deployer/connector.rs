//! # Managed Cluster Connector
//!
//! Builds API clients for managed clusters from the kubeconfig Secrets stored
//! in the management cluster:
//!
//! - CAPI: `<cluster>-kubeconfig`, key `value`
//! - Sveltos: `<cluster>-sveltos-kubeconfig`, key `kubeconfig` (or `value`)

use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use zeroize::Zeroizing;

use crate::controller::error::AddOnError;
use crate::controller::keys::ClusterKey;
use crate::crd::ClusterType;

#[derive(Clone)]
pub struct ClusterConnector {
    management: Client,
}

impl ClusterConnector {
    #[must_use]
    pub fn new(management: Client) -> Self {
        Self { management }
    }

    #[must_use]
    pub fn management_client(&self) -> Client {
        self.management.clone()
    }

    /// Raw kubeconfig of `cluster`; `None` when its Secret does not exist
    ///
    /// # Errors
    ///
    /// `DeployFatal` when the Secret exists but holds no kubeconfig.
    pub async fn kubeconfig(
        &self,
        cluster: &ClusterKey,
    ) -> Result<Option<Zeroizing<Vec<u8>>>, AddOnError> {
        let (secret_name, keys): (String, &[&str]) = match cluster.cluster_type {
            ClusterType::Capi => (format!("{}-kubeconfig", cluster.name), &["value"]),
            ClusterType::Sveltos => (
                format!("{}-sveltos-kubeconfig", cluster.name),
                &["kubeconfig", "value"],
            ),
        };

        let secrets: Api<Secret> = Api::namespaced(self.management.clone(), &cluster.namespace);
        let Some(secret) = secrets.get_opt(&secret_name).await? else {
            return Ok(None);
        };
        let data = secret.data.unwrap_or_default();
        keys.iter()
            .find_map(|key| data.get(*key))
            .map(|bytes| Some(Zeroizing::new(bytes.0.clone())))
            .ok_or_else(|| {
                AddOnError::DeployFatal(format!(
                    "secret {}/{secret_name} has no kubeconfig",
                    cluster.namespace
                ))
            })
    }

    /// API client for `cluster`
    ///
    /// # Errors
    ///
    /// `DeployFatal` when the kubeconfig is missing or unusable.
    pub async fn client(&self, cluster: &ClusterKey) -> Result<Client, AddOnError> {
        let kubeconfig = self.kubeconfig(cluster).await?.ok_or_else(|| {
            AddOnError::DeployFatal(format!("kubeconfig for cluster {cluster} not found"))
        })?;
        client_from_kubeconfig(&kubeconfig).await
    }
}

/// Create a client from kubeconfig bytes
///
/// # Errors
///
/// `DeployFatal` when the kubeconfig cannot be parsed or used.
pub async fn client_from_kubeconfig(kubeconfig: &[u8]) -> Result<Client, AddOnError> {
    let text = std::str::from_utf8(kubeconfig)
        .map_err(|e| AddOnError::DeployFatal(format!("kubeconfig is not UTF-8: {e}")))?;
    let kubeconfig = Kubeconfig::from_yaml(text)
        .map_err(|e| AddOnError::DeployFatal(format!("failed to parse kubeconfig: {e}")))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| AddOnError::DeployFatal(format!("failed to load kubeconfig: {e}")))?;
    Client::try_from(config)
        .map_err(|e| AddOnError::DeployFatal(format!("failed to create client: {e}")))
}
