// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Cluster-state gauges ---
    /// The number of aggregates currently enabled for HA.
    pub static ref ACTIVE_CLUSTERS: Gauge =
        register_gauge!("hamgr_active_clusters", "Number of aggregates currently enabled for HA.").unwrap();

    // --- Reconciler ---
    /// Wall-clock duration of a single drift-reconciliation tick over the fleet.
    pub static ref RECONCILE_CYCLE_SECONDS: Histogram =
        register_histogram!("hamgr_reconcile_cycle_seconds", "Duration of one drift reconciliation tick across all active clusters.").unwrap();
    /// Per-cluster reconciliation failures, labeled by outcome.
    pub static ref RECONCILE_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("hamgr_reconcile_failures_total", "Total drift reconciliation failures, labeled by cause.", &["reason"]).unwrap();
    /// Clusters reshaped to converge on aggregate membership.
    pub static ref RECONCILE_RESHAPES_TOTAL: Counter =
        register_counter!("hamgr_reconcile_reshapes_total", "Total clusters reshaped by the drift reconciler.").unwrap();

    // --- Enable / disable workflow ---
    /// Enable attempts, labeled by outcome (`completed`, `rejected`, `rolled_back`, `rollback_failed`).
    pub static ref ENABLE_TOTAL: CounterVec =
        register_counter_vec!("hamgr_enable_total", "Total enable() invocations, labeled by outcome.", &["outcome"]).unwrap();
    /// Disable attempts, labeled by outcome (`completed`, `error_removing`).
    pub static ref DISABLE_TOTAL: CounterVec =
        register_counter_vec!("hamgr_disable_total", "Total disable() invocations, labeled by outcome.", &["outcome"]).unwrap();
    /// Failures attaching or detaching the HA agent role on a host.
    pub static ref ROLE_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("hamgr_role_failures_total", "Total role attach/detach failures, labeled by operation.", &["operation"]).unwrap();

    // --- Host-down coordinator ---
    /// Host-down events received from the notification source.
    pub static ref HOST_DOWN_EVENTS_TOTAL: Counter =
        register_counter!("hamgr_host_down_events_total", "Total host-down events processed.").unwrap();
    /// Host-up events received from the notification source.
    pub static ref HOST_UP_EVENTS_TOTAL: Counter =
        register_counter!("hamgr_host_up_events_total", "Total host-up events processed.").unwrap();
    /// Clusters reshaped in response to the down-host quorum being reached.
    pub static ref HOST_DOWN_RESHAPES_TOTAL: Counter =
        register_counter!("hamgr_host_down_reshapes_total", "Total clusters reshaped after a quorum of down hosts was confirmed.").unwrap();

    // --- Upstream RPC clients ---
    /// Keystone token fetch/refresh attempts, labeled by outcome.
    pub static ref TOKEN_REFRESH_TOTAL: CounterVec =
        register_counter_vec!("hamgr_token_refresh_total", "Total Keystone token fetch attempts, labeled by outcome.", &["outcome"]).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
