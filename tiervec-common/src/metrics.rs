//! Metrics helpers for TierVec

use metrics::{counter, histogram};
use std::time::Instant;

// ============================================================================
// Storage Metrics
// ============================================================================

/// Record bytes read from a backing store
pub fn record_backend_read(bytes: u64) {
    counter!("tiervec_backend_bytes_read_total").increment(bytes);
}

/// Record bytes written to a backing store
pub fn record_backend_write(bytes: u64) {
    counter!("tiervec_backend_bytes_written_total").increment(bytes);
}

/// Record backing-store operation latency
pub fn record_backend_latency(operation: &str, latency_us: f64) {
    histogram!("tiervec_backend_operation_duration_us", "operation" => operation.to_string())
        .record(latency_us);
}

/// Record cache hit/miss on the tiered read path
pub fn record_cache_access(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("tiervec_cache_accesses_total", "result" => result.to_string()).increment(1);
}

/// Record a cache eviction
pub fn record_cache_eviction() {
    counter!("tiervec_cache_evictions_total").increment(1);
}

// ============================================================================
// Query Metrics
// ============================================================================

/// Record a completed k-NN query
pub fn record_query(mode: &str) {
    counter!("tiervec_queries_total", "mode" => mode.to_string()).increment(1);
}

/// Record query latency
pub fn record_query_latency(mode: &str, latency_us: f64) {
    histogram!("tiervec_query_duration_us", "mode" => mode.to_string()).record(latency_us);
}

/// Record modeled device-service time for one query
pub fn record_device_time(us: f64) {
    histogram!("tiervec_device_time_us").record(us);
}

// ============================================================================
// Timer
// ============================================================================

/// Timer for measuring operation latency in microseconds
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed_us(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1_000_000.0
    }
}
