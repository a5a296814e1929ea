//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `managed_environment_reconciliations_total` - Total number of reconciliations
//! - `managed_environment_reconciliation_errors_total` - Reconciliation errors by kind
//! - `managed_environment_reconciliation_duration_seconds` - Duration of reconciliations
//! - `managed_environment_registrations` - Cluster registrations currently written
//! - `managed_environment_identities_provisioned_total` - Service accounts provisioned
//! - `managed_environment_token_poll_duration_seconds` - Time spent waiting for minted tokens
//! - `managed_environment_requeues_total` - Requeues by reason
//! - `managed_environment_status_updates_total` - Status writes that changed the resource

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_environment_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "managed_environment_reconciliation_errors_total",
            "Total number of reconciliation errors by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "managed_environment_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REGISTRATIONS_MANAGED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "managed_environment_registrations",
        "Current number of cluster registrations written by this controller",
    )
    .expect("Failed to create REGISTRATIONS_MANAGED metric - this should never happen")
});

static IDENTITIES_PROVISIONED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_environment_identities_provisioned_total",
        "Total number of service accounts provisioned on target clusters",
    )
    .expect("Failed to create IDENTITIES_PROVISIONED_TOTAL metric - this should never happen")
});

static TOKEN_POLL_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "managed_environment_token_poll_duration_seconds",
            "Time spent waiting for a provisioned service account token in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create TOKEN_POLL_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "managed_environment_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static STATUS_UPDATES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_environment_status_updates_total",
        "Total number of status writes that changed a resource",
    )
    .expect("Failed to create STATUS_UPDATES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REGISTRATIONS_MANAGED.clone()))?;
    REGISTRY.register(Box::new(IDENTITIES_PROVISIONED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOKEN_POLL_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_UPDATES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_registrations_managed() {
    REGISTRATIONS_MANAGED.inc();
}

pub fn decrement_registrations_managed() {
    REGISTRATIONS_MANAGED.dec();
}

pub fn set_registrations_managed(count: i64) {
    REGISTRATIONS_MANAGED.set(count);
}

pub fn increment_identities_provisioned() {
    IDENTITIES_PROVISIONED_TOTAL.inc();
}

pub fn observe_token_poll_duration(duration: f64) {
    TOKEN_POLL_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_status_updates() {
    STATUS_UPDATES_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_counters_track_per_label() {
        let before = RECONCILIATION_ERRORS_TOTAL
            .with_label_values(&["metrics-test"])
            .get();
        increment_reconciliation_errors("metrics-test");
        assert_eq!(
            RECONCILIATION_ERRORS_TOTAL
                .with_label_values(&["metrics-test"])
                .get(),
            before + 1
        );
    }
}
