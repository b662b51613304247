//! # Managed Clusters
//!
//! Minimal views of the cluster kinds the controller reads. Only the fields
//! needed for matching and deployment are modelled; unknown fields are ignored.

use serde::{Deserialize, Serialize};

/// Kind of managed cluster
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, schemars::JsonSchema,
)]
pub enum ClusterType {
    /// Cluster API `Cluster`
    Capi,
    /// `SveltosCluster` registered with a kubeconfig
    Sveltos,
}

impl ClusterType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Capi => "Capi",
            ClusterType::Sveltos => "Sveltos",
        }
    }
}

/// Identity of a managed cluster
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReference {
    pub cluster_type: ClusterType,
    pub namespace: String,
    pub name: String,
}

impl ClusterReference {
    #[must_use]
    pub fn new(cluster_type: ClusterType, namespace: &str, name: &str) -> Self {
        Self {
            cluster_type,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ClusterReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.cluster_type.as_str(),
            self.namespace,
            self.name
        )
    }
}

/// Cluster API Cluster
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Cluster",
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    namespaced,
    status = "CapiClusterStatus",
    root = "CapiCluster"
)]
#[serde(rename_all = "camelCase")]
pub struct CapiClusterSpec {
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapiClusterStatus {
    #[serde(default)]
    pub control_plane_ready: bool,
}

/// Cluster registered with Sveltos through a kubeconfig Secret
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "SveltosCluster",
    group = "lib.projectsveltos.io",
    version = "v1alpha1",
    namespaced,
    status = "SveltosClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SveltosClusterSpec {
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SveltosClusterStatus {
    #[serde(default)]
    pub ready: bool,
}

/// Cluster API Machine (node of a CAPI cluster)
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Machine",
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    #[serde(default)]
    pub cluster_name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default)]
    pub phase: Option<String>,
}
