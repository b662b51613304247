//! # Reconciler
//!
//! Drives `EventBasedAddOn` resources end to end.
//!
//! - `reconcile.rs` - entry point, single-flight per add-on, deadline
//! - `finalize.rs` - lifecycle phases and finalizer-based cleanup
//! - `process.rs` - one pass over a live add-on
//! - `cluster.rs` - per-cluster fetch, hash and deploy
//! - `event_sources.rs` - EventSource deployment and pruning
//! - `status.rs` - ClusterInfo and the Ready condition
//! - `requeue.rs` - secondary object changes to add-on keys
//! - `types.rs` - shared context and errors

mod cluster;
mod event_sources;
mod finalize;
mod process;
mod reconcile;
mod requeue;
mod status;
mod types;

pub use cluster::{process_event_based_add_on_for_cluster, ClusterOutcome, ClusterWork};
pub use event_sources::{deploy_event_source, event_source_manifest, remove_stale_event_sources};
pub use finalize::{cleanup_attempts, finalize, LifecyclePhase};
pub use process::{process_event_based_add_on, remove_from_cluster};
pub use reconcile::{rebuild_index, reconcile};
pub use requeue::{
    requeue_for_cluster, requeue_for_event_report, requeue_for_machine, requeue_for_reference,
    to_object_refs,
};
pub use status::{
    remove_cluster_info_entry, set_ready_condition, update_cluster_info, ClusterUpdate,
    READY_CONDITION,
};
pub use types::{BackoffState, Reconciler, ReconcilerError, TriggerSource};
