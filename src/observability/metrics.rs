//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `config_rollout_reconciliations_total` - Reconciliations by workload kind
//! - `config_rollout_reconciliation_errors_total` - Reconciliation errors by workload kind and error
//! - `config_rollout_reconciliation_duration_seconds` - Duration of reconciliations
//! - `config_rollout_owner_references_added_total` - Owner references added to ConfigMaps/Secrets
//! - `config_rollout_owner_references_removed_total` - Owner references removed from ConfigMaps/Secrets
//! - `config_rollout_restarts_triggered_total` - Pod template fingerprint updates by workload kind
//! - `config_rollout_requeues_total` - Requeues scheduled by the error policy
//! - `config_rollout_children_per_reconcile` - ConfigMaps/Secrets referenced per managed reconcile, by kind

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "config_rollout_reconciliations_total",
            "Total number of reconciliations by workload kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "config_rollout_reconciliation_errors_total",
            "Total number of reconciliation errors by workload kind and error",
        ),
        &["kind", "error"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "config_rollout_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static OWNER_REFERENCES_ADDED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "config_rollout_owner_references_added_total",
        "Total number of owner references added to ConfigMaps and Secrets",
    )
    .expect("Failed to create OWNER_REFERENCES_ADDED_TOTAL metric - this should never happen")
});

static OWNER_REFERENCES_REMOVED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "config_rollout_owner_references_removed_total",
        "Total number of owner references removed from ConfigMaps and Secrets",
    )
    .expect("Failed to create OWNER_REFERENCES_REMOVED_TOTAL metric - this should never happen")
});

static RESTARTS_TRIGGERED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "config_rollout_restarts_triggered_total",
            "Total number of rollouts triggered by a configuration change",
        ),
        &["kind"],
    )
    .expect("Failed to create RESTARTS_TRIGGERED_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "config_rollout_requeues_total",
            "Total number of requeues scheduled after a failed reconciliation",
        ),
        &["kind"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static CHILDREN_PER_RECONCILE: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "config_rollout_children_per_reconcile",
            "Number of ConfigMaps and Secrets referenced by a managed workload per reconciliation",
        )
        .buckets(vec![0.0, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0]),
        &["kind"],
    )
    .expect("Failed to create CHILDREN_PER_RECONCILE metric - this should never happen")
});

/// Register all metrics with the shared registry
///
/// # Errors
///
/// Returns an error when a metric is registered twice.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(OWNER_REFERENCES_ADDED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OWNER_REFERENCES_REMOVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESTARTS_TRIGGERED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CHILDREN_PER_RECONCILE.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str, error: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[kind, error])
        .inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_owner_references_added(count: usize) {
    OWNER_REFERENCES_ADDED_TOTAL.inc_by(count as u64);
}

pub fn increment_owner_references_removed(count: usize) {
    OWNER_REFERENCES_REMOVED_TOTAL.inc_by(count as u64);
}

pub fn increment_restarts_triggered(kind: &str) {
    RESTARTS_TRIGGERED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_requeues(kind: &str) {
    REQUEUES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_children_per_reconcile(kind: &str, count: usize) {
    let count = u32::try_from(count).map_or(f64::from(u32::MAX), f64::from);
    CHILDREN_PER_RECONCILE.with_label_values(&[kind]).observe(count);
}

/// Number of children-per-reconcile samples recorded for `kind`
#[must_use]
pub fn children_per_reconcile_samples(kind: &str) -> u64 {
    CHILDREN_PER_RECONCILE
        .with_label_values(&[kind])
        .get_sample_count()
}

/// Current value of the restarts counter for `kind`
#[must_use]
pub fn restarts_triggered(kind: &str) -> u64 {
    RESTARTS_TRIGGERED_TOTAL.with_label_values(&[kind]).get()
}

/// Current value of the reconciliation error counter for `kind` and `error`
#[must_use]
pub fn reconciliation_errors(kind: &str, error: &str) -> u64 {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[kind, error])
        .get()
}
