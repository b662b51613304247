//! # References
//!
//! Policy references (ConfigMap/Secret) and Helm chart references.

use serde::{Deserialize, Serialize};

/// Kind of an object referenced by an add-on
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, schemars::JsonSchema,
)]
pub enum ReferencedKind {
    ConfigMap,
    Secret,
    EventSource,
}

impl ReferencedKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferencedKind::ConfigMap => "ConfigMap",
            ReferencedKind::Secret => "Secret",
            ReferencedKind::EventSource => "EventSource",
        }
    }
}

impl std::fmt::Display for ReferencedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a ConfigMap or Secret whose data holds Kubernetes resources
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRef {
    /// Namespace of the referenced object
    pub namespace: String,
    /// Name of the referenced object
    pub name: String,
    /// ConfigMap or Secret
    pub kind: ReferencedKind,
    /// Only deploy the content of this data key (all keys when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Whether a chart release must be present or absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum HelmChartAction {
    #[default]
    Install,
    Uninstall,
}

/// Helm chart to deploy in the matching clusters
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmChart {
    /// URL of the chart repository
    #[serde(rename = "repositoryURL")]
    pub repository_url: String,
    /// Local name of the repository
    pub repository_name: String,
    pub chart_name: String,
    pub chart_version: String,
    pub release_name: String,
    pub release_namespace: String,
    /// Values override (YAML), instantiated with event data before use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
    #[serde(default)]
    pub helm_chart_action: HelmChartAction,
}
