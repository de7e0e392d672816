//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `managed_roles_reconciliations_total` - Total number of reconcile passes
//! - `managed_roles_reconciliation_errors_total` - Total number of passes that returned an error
//! - `managed_roles_reconciliation_duration_seconds` - Duration of reconcile passes
//! - `managed_roles_role_actions_total` - Role statements by action and outcome
//! - `managed_roles_roles` - Roles per phase for each cluster
//! - `managed_roles_status_conflicts_total` - Status writes rejected by a newer resource version

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGaugeVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_roles_reconciliations_total",
        "Total number of reconcile passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_roles_reconciliation_errors_total",
        "Total number of reconcile passes that returned an error",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "managed_roles_reconciliation_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static ROLE_ACTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "managed_roles_role_actions_total",
            "Role statements executed by action and outcome",
        ),
        &["action", "outcome"],
    )
    .expect("Failed to create ROLE_ACTIONS_TOTAL metric - this should never happen")
});

static ROLES_BY_PHASE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new("managed_roles_roles", "Roles per phase for each cluster"),
        &["namespace", "cluster", "phase"],
    )
    .expect("Failed to create ROLES_BY_PHASE metric - this should never happen")
});

static STATUS_CONFLICTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_roles_status_conflicts_total",
        "Status writes rejected because the cluster changed in between",
    )
    .expect("Failed to create STATUS_CONFLICTS_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(ROLE_ACTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ROLES_BY_PHASE.clone()))?;
    REGISTRY.register(Box::new(STATUS_CONFLICTS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

/// Count one executed role statement
/// `outcome` is `ok`, `failed` or `blocked`
pub fn record_role_action(action: &str, outcome: &str) {
    ROLE_ACTIONS_TOTAL.with_label_values(&[action, outcome]).inc();
}

pub fn set_roles_in_phase(namespace: &str, cluster: &str, phase: &str, count: usize) {
    ROLES_BY_PHASE
        .with_label_values(&[namespace, cluster, phase])
        .set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn increment_status_conflicts() {
    STATUS_CONFLICTS_TOTAL.inc();
}
