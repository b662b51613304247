//! # Event Sources and Event Reports
//!
//! `EventSource` describes what to watch in a managed cluster.
//! `EventReport` is the outcome of evaluating it there, collected back into
//! the management cluster.

use serde::{Deserialize, Serialize};

use crate::crd::ClusterType;

/// Label comparison used by an EventSource filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum LabelOperation {
    Equal,
    Different,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelFilter {
    pub key: String,
    pub operation: LabelOperation,
    pub value: String,
}

/// EventSource
///
/// Deployed to managed clusters, where the agent evaluates it and produces
/// an EventReport listing the matching resources.
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "EventSource",
    group = "lib.projectsveltos.io",
    version = "v1alpha1",
    shortname = "es"
)]
#[serde(rename_all = "camelCase")]
pub struct EventSourceSpec {
    /// Group of the resources to watch
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Restrict the watch to one namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_filters: Vec<LabelFilter>,
    /// Lua script classifying a resource as matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Include the full matching resources in the report
    #[serde(default)]
    pub collect_resources: bool,
}

/// Reference to a resource matching an EventSource
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct MatchingResource {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

/// EventReport
///
/// One report per (cluster, event source). In the management cluster it
/// lives in the cluster namespace.
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "EventReport",
    group = "lib.projectsveltos.io",
    version = "v1alpha1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EventReportSpec {
    pub event_source_name: String,
    /// Namespace of the cluster that produced this report
    #[serde(default)]
    pub cluster_namespace: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default = "default_cluster_type")]
    pub cluster_type: ClusterType,
    #[serde(default)]
    pub matching_resources: Vec<MatchingResource>,
    /// Full matching resources (multi-document YAML), when collected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<String>,
}

fn default_cluster_type() -> ClusterType {
    ClusterType::Capi
}
