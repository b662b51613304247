//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Deadline of a single reconciliation pass (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 120;

/// Periodic requeue after a successful reconciliation (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;

/// Default exponential backoff starting value (seconds)
pub const DEFAULT_BACKOFF_START_SECS: u64 = 5;

/// Default exponential backoff maximum value (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default worker-pool bound
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// Failed finalization attempts before cleanup is abandoned
pub const DEFAULT_MAX_CLEANUP_ATTEMPTS: u32 = 5;

/// EventReport collection period (seconds)
pub const DEFAULT_REPORT_COLLECTION_INTERVAL_SECS: u64 = 10;

/// Namespace the controller runs in
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "projectsveltos";

pub const DEFAULT_HELM_BINARY: &str = "helm";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "event-manager";

/// Namespace holding the deployment ledgers in managed clusters
pub const LEDGER_NAMESPACE: &str = "projectsveltos";

/// Ownership labels stamped on every deployed resource
pub const OWNER_KIND_LABEL: &str = "projectsveltos.io/owner-kind";
pub const OWNER_HASH_LABEL: &str = "projectsveltos.io/owner-hash";

/// EventReport labels
pub const EVENT_SOURCE_NAME_LABEL: &str = "projectsveltos.io/eventsource-name";
pub const CLUSTER_NAME_LABEL: &str = "projectsveltos.io/cluster-name";
pub const CLUSTER_TYPE_LABEL: &str = "projectsveltos.io/cluster-type";

/// Label set by Cluster API on Machines
pub const CAPI_CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";
