//! Store metrics collection.
//!
//! - Operation counters by collection, operation and outcome
//! - Latency histograms
//! - Retry counters

use std::time::Instant;

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total store operations by collection, operation and outcome.
    pub const OPERATIONS_TOTAL: &str = "onflix_store_operations_total";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "onflix_store_retries_total";

    /// Operation latency in seconds.
    pub const LATENCY_SECONDS: &str = "onflix_store_latency_seconds";
}

/// Record a completed store operation.
pub fn record_operation(collection: &str, operation: &str, ok: bool, started: Instant) {
    let outcome = if ok { "ok" } else { "error" };

    counter!(
        names::OPERATIONS_TOTAL,
        "collection" => collection.to_string(),
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(started.elapsed().as_secs_f64());
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}
