//! # Deployment Engine
//!
//! Renders the resolved content of an add-on for one cluster and drives the
//! `ClusterApplier` to deploy or remove it.
//!
//! - `applier.rs` - `ClusterApplier` trait, ownership and rendered resources
//! - `kube_applier.rs` - server-side apply with ledger based pruning
//! - `helm.rs` - Helm CLI runner
//! - `connector.rs` - clients for managed clusters from kubeconfig Secrets
//!
//! Per (add-on, cluster) state machine:
//!
//! ```text
//! Absent -> Provisioning -> Provisioned
//!              ^    |
//!              |    v
//!              Failed
//! Provisioned | Failed -> Absent      (removal)
//! Provisioned -> Provisioning        (redeploy after a content change)
//! ```

mod applier;
mod connector;
mod helm;
mod kube_applier;

pub use applier::{
    manifest_identity, ApplyReport, ClusterApplier, DeploymentOwner, OwnerKind, RenderedChart,
    RenderedResource, ResourceIdentity,
};
pub use connector::ClusterConnector;
pub use helm::HelmRunner;
pub use kube_applier::KubeApplier;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::controller::error::AddOnError;
use crate::controller::fetcher::ObservedEventReport;
use crate::controller::keys::ClusterKey;
use crate::controller::resolver::ResolvedReferences;
use crate::controller::template::{instantiate, parse_documents, TemplateContext};
use crate::crd::FeatureStatus;
use crate::observability::metrics;

/// Deployment state of an (add-on, cluster) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    Absent,
    Provisioning,
    Provisioned,
    Failed,
}

impl DeploymentState {
    /// State recorded in a ClusterInfo entry (`None` when there is no entry)
    #[must_use]
    pub fn from_status(status: Option<FeatureStatus>) -> Self {
        match status {
            None => DeploymentState::Absent,
            Some(FeatureStatus::Provisioning) => DeploymentState::Provisioning,
            Some(FeatureStatus::Provisioned) => DeploymentState::Provisioned,
            Some(FeatureStatus::Failed) => DeploymentState::Failed,
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: DeploymentState) -> bool {
        use DeploymentState::{Absent, Failed, Provisioned, Provisioning};
        matches!(
            (self, next),
            (Absent, Provisioning)
                | (Provisioning, Provisioned | Failed)
                | (Failed | Provisioned, Provisioning | Absent)
                // a pair that never got past Provisioning can still be removed
                | (Provisioning, Absent)
        )
    }
}

/// Renders and deploys add-on content through a `ClusterApplier`
#[derive(Clone)]
pub struct DeploymentEngine {
    applier: Arc<dyn ClusterApplier>,
}

impl DeploymentEngine {
    pub fn new(applier: Arc<dyn ClusterApplier>) -> Self {
        Self { applier }
    }

    /// Instantiate policy content and chart values for `cluster`
    ///
    /// # Errors
    ///
    /// `ReferenceInvalid` when a template path is unknown or the instantiated
    /// content is not a list of Kubernetes resources.
    pub fn render(
        &self,
        cluster: &ClusterKey,
        references: &ResolvedReferences,
        report: Option<&ObservedEventReport>,
    ) -> Result<Vec<RenderedResource>, AddOnError> {
        let context = TemplateContext::new(cluster, &references.event_source, report)?;
        let mut rendered = Vec::new();

        for policy in &references.policies {
            let source = policy.reference.to_string();
            for (key, text) in &policy.entries {
                let instantiated = instantiate(text, &context, &source)?;
                let documents = parse_documents(&instantiated).map_err(|e| {
                    AddOnError::reference_invalid(&source, format!("key '{key}': {e}"))
                })?;
                for document in documents {
                    if manifest_identity(&document).is_none() {
                        return Err(AddOnError::reference_invalid(
                            &source,
                            format!("key '{key}' contains an object without apiVersion, kind and metadata.name"),
                        ));
                    }
                    rendered.push(RenderedResource::Manifest(document));
                }
            }
        }

        for chart in &references.charts {
            let source = format!("HelmChart:{}/{}", chart.release_namespace, chart.release_name);
            let values = chart
                .values
                .as_deref()
                .map(|values| instantiate(values, &context, &source))
                .transpose()?;
            rendered.push(RenderedResource::Chart(RenderedChart {
                chart: chart.clone(),
                values,
            }));
        }
        Ok(rendered)
    }

    /// Apply `resources` to `cluster` on behalf of `owner`
    ///
    /// # Errors
    ///
    /// - `DeployPartialFailure` when some resources were rejected; those
    ///   applied stay in place
    /// - `DeployFatal` (or a kube error) when the cluster could not be used
    pub async fn deploy(
        &self,
        cluster: &ClusterKey,
        owner: &DeploymentOwner,
        resources: &[RenderedResource],
    ) -> Result<ApplyReport, AddOnError> {
        debug!(
            cluster = %cluster,
            owner = %owner,
            resources = resources.len(),
            "Deploying resources"
        );
        let report = self.applier.apply(cluster, owner, resources).await?;
        if !report.failures.is_empty() {
            warn!(
                cluster = %cluster,
                owner = %owner,
                failed = report.failures.len(),
                applied = report.applied,
                "Some resources were rejected by the cluster"
            );
            return Err(AddOnError::DeployPartialFailure {
                failures: report.failures,
            });
        }
        info!(
            cluster = %cluster,
            owner = %owner,
            applied = report.applied,
            pruned = report.pruned,
            "Deployment complete"
        );
        Ok(report)
    }

    /// Remove everything `owner` deployed in `cluster`. Removing resources
    /// that are already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns the applier error when the cluster could not be cleaned.
    pub async fn remove(&self, cluster: &ClusterKey, owner: &DeploymentOwner) -> Result<(), AddOnError> {
        self.applier.remove(cluster, owner).await?;
        metrics::increment_removals();
        info!(cluster = %cluster, owner = %owner, "Removed deployed resources");
        Ok(())
    }
}
