//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use event_manager::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::controller::reconciler::{
    reconcile, BackoffState, Reconciler, ReconcilerError, TriggerSource,
};

pub use crate::config::{
    ControllerConfig, ServerConfig, SharedControllerConfig, SharedServerConfig,
};

pub use crate::controller::deployer::{ClusterApplier, DeploymentEngine, DeploymentOwner};
pub use crate::controller::error::AddOnError;
pub use crate::controller::fetcher::EventReportFetcher;
pub use crate::controller::index::DependencyIndex;
pub use crate::controller::keys::{AddOnKey, ClusterKey, ReferenceKey};
pub use crate::controller::store::{ManagedCluster, ObjectStore};
