//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `alb_ingress_reconciliations_total` - Total number of reconcile passes
//! - `alb_ingress_reconciliation_errors_total` - Total number of reconcile passes with errors
//! - `alb_ingress_reconciliation_duration_seconds` - Duration of reconcile passes
//! - `alb_ingress_managed_ingresses` - Current number of ingresses being managed
//! - `alb_ingress_aws_api_calls_total` - Total number of AWS API calls by operation
//! - `alb_ingress_aws_api_errors_total` - Total number of AWS API errors by operation
//! - `alb_ingress_aws_api_duration_seconds` - Duration of AWS API calls by operation

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "alb_ingress_reconciliations_total",
        "Total number of reconcile passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "alb_ingress_reconciliation_errors_total",
        "Total number of reconcile passes that reported errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "alb_ingress_reconciliation_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static MANAGED_INGRESSES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "alb_ingress_managed_ingresses",
        "Current number of ingresses being managed",
    )
    .expect("Failed to create MANAGED_INGRESSES metric - this should never happen")
});

static AWS_API_CALLS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "alb_ingress_aws_api_calls_total",
            "Total number of AWS API calls by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create AWS_API_CALLS_TOTAL metric - this should never happen")
});

static AWS_API_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "alb_ingress_aws_api_errors_total",
            "Total number of AWS API errors by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create AWS_API_ERRORS_TOTAL metric - this should never happen")
});

static AWS_API_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "alb_ingress_aws_api_duration_seconds",
            "Duration of AWS API calls in seconds by operation",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["operation"],
    )
    .expect("Failed to create AWS_API_DURATION metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only when a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(MANAGED_INGRESSES.clone()))?;
    REGISTRY.register(Box::new(AWS_API_CALLS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AWS_API_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(AWS_API_DURATION.clone()))?;

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

pub fn set_managed_ingresses(count: i64) {
    MANAGED_INGRESSES.set(count);
}

/// Record one AWS API call with its wall-clock duration
pub fn record_aws_api_call(operation: &str, duration: f64) {
    AWS_API_CALLS_TOTAL.with_label_values(&[operation]).inc();
    AWS_API_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn increment_aws_api_errors(operation: &str) {
    AWS_API_ERRORS_TOTAL.with_label_values(&[operation]).inc();
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
        let after = RECONCILIATIONS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors() {
        let before = RECONCILIATION_ERRORS_TOTAL.get();
        increment_reconciliation_errors();
        let after = RECONCILIATION_ERRORS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        observe_reconciliation_duration(1.5);
        // Just verify it doesn't panic - histogram observation doesn't return a value
    }

    #[test]
    fn test_set_managed_ingresses() {
        set_managed_ingresses(10);
        assert_eq!(MANAGED_INGRESSES.get(), 10);
        set_managed_ingresses(20);
        assert_eq!(MANAGED_INGRESSES.get(), 20);
    }

    #[test]
    fn test_record_aws_api_call() {
        let before = AWS_API_CALLS_TOTAL
            .with_label_values(&["CreateTargetGroup"])
            .get();
        record_aws_api_call("CreateTargetGroup", 0.3);
        let after = AWS_API_CALLS_TOTAL
            .with_label_values(&["CreateTargetGroup"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_aws_api_errors() {
        let before = AWS_API_ERRORS_TOTAL
            .with_label_values(&["DeleteTargetGroup"])
            .get();
        increment_aws_api_errors("DeleteTargetGroup");
        let after = AWS_API_ERRORS_TOTAL
            .with_label_values(&["DeleteTargetGroup"])
            .get();
        assert_eq!(after, before + 1u64);
    }
}
