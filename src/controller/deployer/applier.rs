//! # Cluster Applier
//!
//! Apply/prune primitive for one managed cluster. Every resource applied for
//! an owner carries the owner's labels; `apply` deletes whatever the owner
//! deployed previously and is absent from the new set.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::{OWNER_HASH_LABEL, OWNER_KIND_LABEL};
use crate::controller::error::AddOnError;
use crate::controller::keys::{AddOnKey, ClusterKey};
use crate::crd::{HelmChart, EVENT_BASED_ADD_ON_KIND};

/// Kind of object owning a set of deployed resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnerKind {
    AddOn,
    EventSource,
}

impl OwnerKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::AddOn => EVENT_BASED_ADD_ON_KIND,
            OwnerKind::EventSource => "EventSource",
        }
    }
}

/// Owner of deployed resources, stamped on them as labels
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeploymentOwner {
    pub kind: OwnerKind,
    pub name: String,
}

impl DeploymentOwner {
    #[must_use]
    pub fn add_on(key: &AddOnKey) -> Self {
        Self {
            kind: OwnerKind::AddOn,
            name: key.to_string(),
        }
    }

    #[must_use]
    pub fn event_source(name: &str) -> Self {
        Self {
            kind: OwnerKind::EventSource,
            name: name.to_string(),
        }
    }

    /// Label-safe digest of the owner identity (label values are capped at 63 chars)
    #[must_use]
    pub fn label_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(b"/");
        hasher.update(self.name.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..40].to_string()
    }

    /// Ownership labels for deployed resources
    #[must_use]
    pub fn labels(&self) -> [(&'static str, String); 2] {
        [
            (OWNER_KIND_LABEL, self.kind.as_str().to_string()),
            (OWNER_HASH_LABEL, self.label_hash()),
        ]
    }

    /// Name of the ledger ConfigMap kept for this owner in a managed cluster
    #[must_use]
    pub fn ledger_name(&self) -> String {
        format!(
            "{}-{}",
            self.kind.as_str().to_lowercase(),
            &self.label_hash()[..20]
        )
    }
}

impl fmt::Display for DeploymentOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.name)
    }
}

/// Helm release to install or uninstall, values already instantiated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChart {
    pub chart: HelmChart,
    pub values: Option<String>,
}

/// Identity of a deployed object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentity {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{} {}", self.api_version, self.kind, self.name)
        } else {
            write!(f, "{}/{} {}/{}", self.api_version, self.kind, self.namespace, self.name)
        }
    }
}

/// Final form of a resource to deploy
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedResource {
    Manifest(Value),
    Chart(RenderedChart),
}

impl RenderedResource {
    /// Identity of a manifest; `None` for charts
    #[must_use]
    pub fn identity(&self) -> Option<ResourceIdentity> {
        match self {
            RenderedResource::Manifest(value) => manifest_identity(value),
            RenderedResource::Chart(_) => None,
        }
    }
}

/// Extract apiVersion/kind/namespace/name from a manifest
#[must_use]
pub fn manifest_identity(value: &Value) -> Option<ResourceIdentity> {
    let api_version = value.get("apiVersion")?.as_str()?.to_string();
    let kind = value.get("kind")?.as_str()?.to_string();
    let metadata = value.get("metadata")?;
    let name = metadata.get("name")?.as_str()?.to_string();
    let namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (!api_version.is_empty() && !kind.is_empty() && !name.is_empty()).then_some(ResourceIdentity {
        api_version,
        kind,
        namespace,
        name,
    })
}

/// Outcome of an apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub pruned: usize,
    /// One entry per rejected resource
    pub failures: Vec<String>,
}

#[async_trait]
pub trait ClusterApplier: Send + Sync {
    /// Create or update `resources` in `cluster` and prune what `owner`
    /// deployed before that is not part of `resources`
    ///
    /// Per-resource rejections are reported in `ApplyReport::failures`; an
    /// `Err` means nothing could be done (cluster unreachable).
    async fn apply(
        &self,
        cluster: &ClusterKey,
        owner: &DeploymentOwner,
        resources: &[RenderedResource],
    ) -> Result<ApplyReport, AddOnError>;

    /// Remove everything `owner` deployed in `cluster`. Idempotent.
    async fn remove(&self, cluster: &ClusterKey, owner: &DeploymentOwner) -> Result<(), AddOnError>;
}
