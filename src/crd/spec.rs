//! # EventBasedAddOn Spec
//!
//! Main CRD specification and the constants shared with the reconciler.

use serde::{Deserialize, Serialize};

/// Finalizer that keeps an `EventBasedAddOn` in the API server until every
/// resource it deployed has been removed from the managed clusters.
pub const EVENT_BASED_ADD_ON_FINALIZER: &str = "eventbasedaddon.finalizer.projectsveltos.io";

pub const EVENT_BASED_ADD_ON_KIND: &str = "EventBasedAddOn";

/// Annotation counting failed finalization attempts.
/// Persisted on the resource so the bound survives controller restarts.
pub const CLEANUP_ATTEMPTS_ANNOTATION: &str = "eventbasedaddon.projectsveltos.io/cleanup-attempts";

/// EventBasedAddOn Custom Resource Definition
///
/// Deploys the resources contained in the referenced ConfigMaps/Secrets and
/// Helm charts to every cluster matching `clusterSelector`, customized with
/// the events reported by that cluster for `eventSourceName`.
///
/// # Example
///
/// ```yaml
/// apiVersion: lib.projectsveltos.io/v1alpha1
/// kind: EventBasedAddOn
/// metadata:
///   name: service-network-policy
/// spec:
///   clusterSelector: env=fv
///   eventSourceName: load-balancer-service
///   policyRefs:
///   - name: network-policy
///     namespace: default
///     kind: ConfigMap
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "EventBasedAddOn",
    group = "lib.projectsveltos.io",
    version = "v1alpha1",
    status = "crate::crd::EventBasedAddOnStatus",
    shortname = "eba",
    printcolumn = r#"{"name":"Selector", "type":"string", "jsonPath":".spec.clusterSelector"}, {"name":"EventSource", "type":"string", "jsonPath":".spec.eventSourceName"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EventBasedAddOnSpec {
    /// ClusterSelector identifies clusters to associate to.
    /// Format: comma separated label requirements (e.g. `env=prod, region in (eu, us)`)
    /// An empty selector matches no cluster.
    #[serde(default)]
    pub cluster_selector: String,
    /// Name of the referenced EventSource.
    /// Resources contained in the referenced ConfigMaps/Secrets and HelmCharts
    /// are customized using the resources matching the EventSource in the
    /// managed cluster.
    pub event_source_name: String,
    /// ConfigMaps/Secrets containing the Kubernetes resources to deploy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_refs: Vec<crate::crd::PolicyRef>,
    /// Helm charts to deploy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helm_charts: Vec<crate::crd::HelmChart>,
}
