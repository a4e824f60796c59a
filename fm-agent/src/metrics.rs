//! Prometheus metrics for monitoring fm-agent itself.
//!
//! All metrics use the default Prometheus registry and follow naming conventions:
//! - Histograms: *_seconds (for latency)
//! - Counters: *_total (for counts)

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ==================== LATENCY METRICS ====================

    pub static ref CYCLE_DURATION: Histogram = register_histogram!(
        "fm_agent_cycle_duration_seconds",
        "Time spent on one fetch-resolve-reconcile-emit cycle, including emit throttling",
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .unwrap();
    pub static ref SINK_SEND_DURATION: HistogramVec = register_histogram_vec!(
        "fm_agent_sink_send_duration_seconds",
        "Time spent delivering one event to the sink",
        &["result"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .unwrap();

    // ==================== ERROR COUNTERS ====================
    pub static ref SINK_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fm_agent_sink_failures_total",
        "Events dropped because the sink rejected them",
        &["status"]
    )
    .unwrap();
    pub static ref STORAGE_FETCH_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fm_agent_storage_fetch_errors_total",
        "Zone listings that failed or timed out",
        &["zone"]
    )
    .unwrap();
    pub static ref CYCLE_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "fm_agent_cycle_errors_total",
        "Cycles aborted by an unexpected error"
    )
    .unwrap();

    // ==================== THROUGHPUT METRICS ====================
    pub static ref EVENTS_EMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fm_agent_events_emitted_total",
        "Lifecycle events delivered by status",
        &["status"]
    )
    .unwrap();

    // ==================== GAUGE METRICS ====================
    pub static ref TRACKED_FILES: IntGauge = register_int_gauge!(
        "fm_agent_tracked_files",
        "Files received and not yet archived or errored"
    )
    .unwrap();
    pub static ref MISSING_CANDIDATES: IntGauge = register_int_gauge!(
        "fm_agent_missing_candidates",
        "Expected files inside their window with no arrival yet"
    )
    .unwrap();
    pub static ref EXPECTED_FILES: IntGauge = register_int_gauge!(
        "fm_agent_expected_files",
        "Expectations resolved for the current day"
    )
    .unwrap();
}
