//! # Error Policy
//!
//! Backoff for failed reconciliations and classification of watch stream
//! errors.

use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::controller::keys::get_key_from_object;
use crate::controller::reconciler::{Reconciler, ReconcilerError, TriggerSource};
use crate::crd::EventBasedAddOn;
use crate::observability::metrics;

/// Requeue a failed add-on after its next exponential backoff delay
///
/// Backoff state is tracked per add-on so a failing add-on never delays
/// the others.
pub fn handle_reconciliation_error(
    add_on: Arc<EventBasedAddOn>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let key = get_key_from_object(add_on.as_ref());
    let span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        addon = %key,
        error = %error
    );
    let _guard = span.enter();

    error!(reason = error.reason(), "Reconciliation error for {}: {}", add_on.name_any(), error);
    metrics::increment_reconciliation_errors(error.reason());

    if error.is_terminal() {
        warn!("Error is not retryable, waiting for a spec change");
        return Action::await_change();
    }

    let (delay, error_count) = ctx.next_backoff(&key);
    info!(
        delay_secs = delay.as_secs(),
        error_count,
        trigger = TriggerSource::ErrorBackoff.as_str(),
        "Retrying with exponential backoff"
    );
    metrics::increment_requeues(TriggerSource::ErrorBackoff.as_str(), 1);
    Action::requeue(delay)
}

/// Kind of failure reported by the controller stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    /// Resource version expired, normal after restarts
    Expired,
    /// API server storage reinitializing
    TooManyRequests,
    NotFound,
    Other,
}

impl WatchErrorKind {
    /// Classify an error by its debug rendering.
    /// 404 is checked first since not-found errors may mention `WatchFailed`.
    #[must_use]
    pub fn classify(error: &str) -> Self {
        let not_found = error.contains("ObjectNotFound")
            || error.contains("404")
            || error.contains("not found");
        if not_found {
            WatchErrorKind::NotFound
        } else if error.contains("401") || error.contains("Unauthorized") {
            WatchErrorKind::Unauthorized
        } else if error.contains("410")
            || error.contains("too old resource version")
            || error.contains("Expired")
            || error.contains("Gone")
        {
            WatchErrorKind::Expired
        } else if error.contains("429")
            || error.contains("storage is (re)initializing")
            || error.contains("TooManyRequests")
        {
            WatchErrorKind::TooManyRequests
        } else {
            WatchErrorKind::Other
        }
    }
}

/// Handle an error from the controller stream
///
/// Returns `false` when the watch should be restarted, `true` to keep
/// consuming the stream.
pub async fn handle_watch_stream_error(
    error: &str,
    backoff_ms: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    restart_delay: Duration,
) -> bool {
    let span = tracing::span!(tracing::Level::WARN, "controller.watch.error", error = %error);
    let _guard = span.enter();

    match WatchErrorKind::classify(error) {
        WatchErrorKind::NotFound => {
            warn!("Watched resource not found (404), the CRD may be missing: {}", error);
            true
        }
        WatchErrorKind::Unauthorized => {
            error!("Watch authentication failed (401), check the controller RBAC");
            warn!(
                "Waiting {}s before retrying watch",
                restart_delay.as_secs()
            );
            tokio::time::sleep(restart_delay).await;
            false
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "Watch resource version expired, restarting watch");
            false
        }
        WatchErrorKind::TooManyRequests => {
            let current = backoff_ms.load(Ordering::Relaxed);
            warn!("API server storage reinitializing (429), backing off for {}ms", current);
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff_ms.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            false
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error);
            tokio::time::sleep(restart_delay).await;
            false
        }
    }
}
