//! # EventBasedAddOn Status
//!
//! Status types for tracking matching clusters and per-cluster deployments.

use serde::{Deserialize, Serialize};

use crate::crd::ClusterReference;

/// Status of the EventBasedAddOn resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventBasedAddOnStatus {
    /// Clusters currently matching the ClusterSelector
    #[serde(default, rename = "matchingClusters")]
    pub matching_cluster_refs: Vec<ClusterReference>,
    /// Deployment status in each managed cluster
    #[serde(default)]
    pub cluster_info: Vec<ClusterInfo>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Generation processed by the last reconciliation
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl EventBasedAddOnStatus {
    /// ClusterInfo entry for the given cluster, if any
    #[must_use]
    pub fn cluster_info_for(&self, cluster: &ClusterReference) -> Option<&ClusterInfo> {
        self.cluster_info.iter().find(|ci| &ci.cluster == cluster)
    }

    /// Ready condition, if recorded
    #[must_use]
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == "Ready")
    }
}

/// Deployment status of an add-on in one cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum FeatureStatus {
    Provisioning,
    Provisioned,
    Failed,
}

impl FeatureStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureStatus::Provisioning => "Provisioning",
            FeatureStatus::Provisioned => "Provisioned",
            FeatureStatus::Failed => "Failed",
        }
    }
}

/// Per-cluster deployment record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    /// Cluster this entry refers to
    pub cluster: ClusterReference,
    /// Digest of the content last applied successfully.
    /// Cleared when a deployment fails so the next pass retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub status: FeatureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    /// Time of the last successful apply (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_time: Option<String>,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}
