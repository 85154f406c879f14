//! Prometheus metrics for the KubeEdge apps operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `kubeedge_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `kubeedge_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `kubeedge_status_watchers` (gauge): number of kinds with an active status watcher.
//! - `kubeedge_trigger_events_dropped_total` (counter): EdgeApplication triggers dropped
//!   because the trigger channel was full.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "nodegroup"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Controller name, e.g. "edgeapplication"
    pub controller: String,
    /// Error kind, e.g. "kube", "override", "parse"
    pub kind: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Gauge tracking kinds with a running status watcher
pub static STATUS_WATCHERS: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

/// Counter tracking triggers dropped on a full channel
pub static TRIGGER_EVENTS_DROPPED_TOTAL: Lazy<Counter<u64, AtomicU64>> =
    Lazy::new(Counter::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "kubeedge_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );

    registry.register(
        "kubeedge_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );

    registry.register(
        "kubeedge_status_watchers",
        "Number of resource kinds with an active status watcher",
        STATUS_WATCHERS.clone(),
    );

    registry.register(
        "kubeedge_trigger_events_dropped_total",
        "EdgeApplication re-sync triggers dropped because the channel was full",
        TRIGGER_EVENTS_DROPPED_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn set_status_watchers(count: usize) {
    STATUS_WATCHERS.set(count as i64);
}

pub fn inc_trigger_dropped() {
    TRIGGER_EVENTS_DROPPED_TOTAL.inc();
}
