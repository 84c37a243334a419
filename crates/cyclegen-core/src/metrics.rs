//! Central metrics registry and metric definitions
//!
//! Metrics are registered lazily on first access using once_cell::Lazy and
//! labelled by activity alias.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

// ===== Cycle Metrics =====

/// Completed cycles by outcome (success, error, ignored)
pub static CYCLES_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cyclegen_cycles_completed_total",
        "Total number of completed cycles",
        &["activity", "outcome"]
    )
    .expect("Failed to register cycles completed counter")
});

/// Counted errors by kind (dispense, execution, injected, interrupted)
pub static CYCLE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cyclegen_cycle_errors_total",
        "Total number of counted cycle errors",
        &["activity", "kind", "name"]
    )
    .expect("Failed to register cycle errors counter")
});

/// Tries per completed cycle
pub static CYCLE_TRIES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cyclegen_cycle_tries",
        "Executions per completed cycle",
        &["activity"],
        vec![1.0, 2.0, 3.0, 5.0, 10.0, 20.0]
    )
    .expect("Failed to register cycle tries histogram")
});

/// Op service time
pub static SERVICE_TIME: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cyclegen_service_time_seconds",
        "Op service time in seconds, retries included",
        &["activity"],
        // Buckets: 100us .. 10s
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0]
    )
    .expect("Failed to register service time histogram")
});

/// Result payload size
pub static RESULT_PAYLOAD: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cyclegen_result_payload_bytes",
        "Result payload size in bytes",
        &["activity"],
        prometheus::exponential_buckets(16.0, 4.0, 10).unwrap_or_default()
    )
    .expect("Failed to register result payload histogram")
});

// ===== Scheduling Metrics =====

/// How late interval reports fire compared to their quantized slot
pub static REPORT_DELAY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "cyclegen_report_delay_seconds",
        "Interval report delay in seconds",
        &["activity"],
        vec![0.0001, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    )
    .expect("Failed to register report delay histogram")
});

/// Total time spent waiting in the rate limiter
pub static RATE_WAIT_NANOS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "cyclegen_rate_wait_nanoseconds_total",
        "Total time ops spent waiting for rate limiter admission",
        &["activity"]
    )
    .expect("Failed to register rate wait counter")
});

/// How far best-effort pacing is behind its ideal schedule
pub static RATE_LAG_NANOS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "cyclegen_rate_lag_nanoseconds",
        "Lag behind the ideal rate schedule",
        &["activity"]
    )
    .expect("Failed to register rate lag gauge")
});

// ===== Worker Metrics =====

/// Workers currently running
pub static ACTIVE_WORKERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "cyclegen_active_workers",
        "Number of running workers",
        &["activity"]
    )
    .expect("Failed to register active workers gauge")
});

/// Ops started but not yet reported
pub static IN_FLIGHT_OPS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "cyclegen_in_flight_ops",
        "Number of ops started but not yet completed",
        &["activity"]
    )
    .expect("Failed to register in-flight ops gauge")
});

/// Renders every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %err, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        CYCLES_COMPLETED
            .with_label_values(&["metrics-test", "success"])
            .inc_by(3);
        ACTIVE_WORKERS.with_label_values(&["metrics-test"]).set(2);

        let text = gather_text();
        assert!(text.contains("cyclegen_cycles_completed_total"));
        assert!(text.contains("metrics-test"));
    }
}
