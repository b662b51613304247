//! # Types
//!
//! Core types for the reconciler.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::deployer::{ClusterApplier, DeploymentEngine};
use crate::controller::error::AddOnError;
use crate::controller::fetcher::EventReportFetcher;
use crate::controller::index::DependencyIndex;
use crate::controller::keys::AddOnKey;
use crate::controller::resolver::ResourceResolver;
use crate::controller::store::ObjectStore;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] AddOnError),
}

impl ReconcilerError {
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcilerError::ReconciliationFailed(e) => e.reason(),
        }
    }

    /// Retrying cannot help until the add-on spec changes
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            ReconcilerError::ReconciliationFailed(e) => e.is_terminal(),
        }
    }
}

/// Why an add-on was queued for reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// A cluster was created, relabelled, paused or deleted
    ClusterChange,
    /// A CAPI machine changed phase
    MachineChange,
    /// An EventReport was created or rewritten
    EventReportChange,
    /// A referenced ConfigMap, Secret or EventSource changed
    ReferenceChange,
    /// Retry after a failed reconciliation
    ErrorBackoff,
    /// Periodic requeue after success
    Resync,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::ClusterChange => "cluster",
            TriggerSource::MachineChange => "machine",
            TriggerSource::EventReportChange => "event-report",
            TriggerSource::ReferenceChange => "reference",
            TriggerSource::ErrorBackoff => "error-backoff",
            TriggerSource::Resync => "resync",
        }
    }
}

/// Backoff state for a specific add-on
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: ExponentialBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context of every reconciliation
pub struct Reconciler {
    pub store: Arc<dyn ObjectStore>,
    pub fetcher: Arc<dyn EventReportFetcher>,
    pub resolver: ResourceResolver,
    pub engine: DeploymentEngine,
    pub index: Arc<DependencyIndex>,
    pub config: ControllerConfig,
    /// Per add-on retry state, driven by the error policy
    pub backoff_states: Arc<Mutex<HashMap<AddOnKey, BackoffState>>>,
    /// One async lock per add-on; a pass holds it for its whole duration
    locks: Arc<Mutex<HashMap<AddOnKey, Arc<AsyncMutex<()>>>>>,
    /// Add-ons being finalized; requeue fan-out skips them
    terminating: Arc<RwLock<HashSet<AddOnKey>>>,
    /// Cancelled on shutdown; every pass runs under a child token
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("terminating", &self.terminating.read().len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        fetcher: Arc<dyn EventReportFetcher>,
        applier: Arc<dyn ClusterApplier>,
        index: Arc<DependencyIndex>,
        config: ControllerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            resolver: ResourceResolver::new(Arc::clone(&store)),
            engine: DeploymentEngine::new(applier),
            store,
            fetcher,
            index,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            terminating: Arc::new(RwLock::new(HashSet::new())),
            shutdown,
        }
    }

    /// Lock serializing the passes of one add-on
    #[must_use]
    pub fn key_lock(&self, key: &AddOnKey) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    pub fn mark_terminating(&self, key: &AddOnKey) {
        self.terminating.write().insert(key.clone());
    }

    #[must_use]
    pub fn is_terminating(&self, key: &AddOnKey) -> bool {
        self.terminating.read().contains(key)
    }

    /// Drop every per-key record of an add-on that left the API server
    pub fn forget(&self, key: &AddOnKey) {
        self.terminating.write().remove(key);
        self.backoff_states.lock().remove(key);
        self.locks.lock().remove(key);
    }

    /// Record a failure and return the next retry delay with the error count
    pub fn next_backoff(&self, key: &AddOnKey) -> (Duration, u32) {
        let mut states = self.backoff_states.lock();
        let state = states.entry(key.clone()).or_insert_with(|| {
            BackoffState::new(self.config.backoff_start_secs, self.config.backoff_max_secs)
        });
        state.increment_error();
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Reset the retry state after a success; `true` if the add-on was backing off
    pub fn reset_backoff(&self, key: &AddOnKey) -> bool {
        self.backoff_states.lock().get_mut(key).is_some_and(|state| {
            let had_errors = state.error_count > 0;
            state.reset();
            had_errors
        })
    }
}
