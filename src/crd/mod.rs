//! # Custom Resource Definitions
//!
//! CRD types for the event manager.
//!
//! This module contains the `EventBasedAddOn` resource owned by this controller
//! and the external kinds it reads: managed clusters, machines, event sources
//! and event reports.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `EventBasedAddOn` specification and constants
//! - `references.rs` - Policy references and Helm chart references
//! - `status.rs` - Status types (matching clusters, per-cluster info, conditions)
//! - `cluster.rs` - CAPI `Cluster`, `SveltosCluster` and `Machine`
//! - `event.rs` - `EventSource` and `EventReport`

mod cluster;
mod event;
mod references;
mod spec;
mod status;

// Re-export all public types
pub use cluster::{
    CapiCluster, CapiClusterSpec, CapiClusterStatus, ClusterReference, ClusterType, Machine, MachineSpec,
    MachineStatus, SveltosCluster, SveltosClusterSpec, SveltosClusterStatus,
};
pub use event::{
    EventReport, EventReportSpec, EventSource, EventSourceSpec, LabelFilter, LabelOperation,
    MatchingResource,
};
pub use references::{HelmChart, HelmChartAction, PolicyRef, ReferencedKind};
pub use spec::{
    EventBasedAddOn, EventBasedAddOnSpec, CLEANUP_ATTEMPTS_ANNOTATION, EVENT_BASED_ADD_ON_FINALIZER,
    EVENT_BASED_ADD_ON_KIND,
};
pub use status::{ClusterInfo, Condition, EventBasedAddOnStatus, FeatureStatus};
