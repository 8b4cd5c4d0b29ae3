//! Metrics contains the metrics setup for the controller.
//!
//! Counters register against the process-wide recorder installed by the
//! Prometheus exporter in `main`.

use metrics::{Counter, counter};

/// Common metrics for the reconciler.
#[derive(Clone)]
pub struct Metrics {
    /// Metrics collected from the reconciler.
    pub reconcile: ReconcileMetrics,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            reconcile: ReconcileMetrics::default(),
        }
    }
}

/// Metrics collected from the reconciler.
#[derive(Clone)]
pub struct ReconcileMetrics {
    /// Runs records the total number of calls to the reconciler.
    pub runs: Counter,
    /// Failures records the total number of reconciler calls that resulted
    /// in a failure.
    pub failures: Counter,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: counter!("llsd_reconciles_total"),
            failures: counter!("llsd_reconcile_failures_total"),
        }
    }
}
