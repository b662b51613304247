//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `event_manager_reconciliations_total` - Total number of reconciliations
//! - `event_manager_reconciliation_errors_total` - Reconciliation errors by reason
//! - `event_manager_reconciliation_duration_seconds` - Duration of reconciliations
//! - `event_manager_deployments_total` - Per-cluster deployments by outcome
//! - `event_manager_removals_total` - Per-cluster removals
//! - `event_manager_requeues_total` - Requeues fanned out by trigger kind
//! - `event_manager_index_entries` - DependencyIndex entries by map
//! - `event_manager_index_resyncs_total` - Index entries rebuilt after an inconsistency
//! - `event_manager_event_reports_collected_total` - EventReports collected from managed clusters

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGaugeVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "event_manager_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "event_manager_reconciliation_errors_total",
            "Total number of reconciliation errors by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "event_manager_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static DEPLOYMENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "event_manager_deployments_total",
            "Total number of per-cluster deployments by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create DEPLOYMENTS_TOTAL metric - this should never happen")
});

static REMOVALS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "event_manager_removals_total",
        "Total number of per-cluster removals",
    )
    .expect("Failed to create REMOVALS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "event_manager_requeues_total",
            "Total number of add-on requeues by trigger",
        ),
        &["trigger"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static INDEX_ENTRIES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new(
            "event_manager_index_entries",
            "Number of entries in the dependency index by map",
        ),
        &["map"],
    )
    .expect("Failed to create INDEX_ENTRIES metric - this should never happen")
});

static INDEX_RESYNCS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "event_manager_index_resyncs_total",
        "Total number of dependency index entries rebuilt after an inconsistency",
    )
    .expect("Failed to create INDEX_RESYNCS_TOTAL metric - this should never happen")
});

static EVENT_REPORTS_COLLECTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "event_manager_event_reports_collected_total",
        "Total number of EventReports collected from managed clusters",
    )
    .expect("Failed to create EVENT_REPORTS_COLLECTED_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails when a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(DEPLOYMENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REMOVALS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INDEX_ENTRIES.clone()))?;
    REGISTRY.register(Box::new(INDEX_RESYNCS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EVENT_REPORTS_COLLECTED_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(reason: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

/// `outcome` is one of `provisioned`, `failed`, `unchanged`, `skipped`
pub fn increment_deployments(outcome: &str) {
    DEPLOYMENTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_removals() {
    REMOVALS_TOTAL.inc();
}

pub fn increment_requeues(trigger: &str, count: usize) {
    REQUEUES_TOTAL
        .with_label_values(&[trigger])
        .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
}

pub fn set_index_entries(references: usize, clusters: usize) {
    INDEX_ENTRIES
        .with_label_values(&["references"])
        .set(i64::try_from(references).unwrap_or(i64::MAX));
    INDEX_ENTRIES
        .with_label_values(&["clusters"])
        .set(i64::try_from(clusters).unwrap_or(i64::MAX));
}

pub fn increment_index_resyncs() {
    INDEX_RESYNCS_TOTAL.inc();
}

pub fn increment_event_reports_collected(count: usize) {
    EVENT_REPORTS_COLLECTED_TOTAL.inc_by(u64::try_from(count).unwrap_or(u64::MAX));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // This should not panic - metrics should register successfully
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        assert_eq!(RECONCILIATIONS_TOTAL.get(), before + 1u64);
    }

    #[test]
    fn test_reconciliation_errors_by_reason() {
        let before = RECONCILIATION_ERRORS_TOTAL
            .with_label_values(&["ReferenceNotFound"])
            .get();
        increment_reconciliation_errors("ReferenceNotFound");
        let after = RECONCILIATION_ERRORS_TOTAL
            .with_label_values(&["ReferenceNotFound"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_requeues_by_trigger() {
        let before = REQUEUES_TOTAL.with_label_values(&["cluster"]).get();
        increment_requeues("cluster", 3);
        assert_eq!(
            REQUEUES_TOTAL.with_label_values(&["cluster"]).get(),
            before + 3u64
        );
    }

    #[test]
    fn test_set_index_entries() {
        set_index_entries(4, 2);
        assert_eq!(INDEX_ENTRIES.with_label_values(&["references"]).get(), 4);
        assert_eq!(INDEX_ENTRIES.with_label_values(&["clusters"]).get(), 2);
    }
}
