//! Analytic SSD device-timing model
//!
//! A first-order closed form: every read costs a fixed device latency plus a
//! bandwidth term, divided by the channel-level parallelism. Queuing dynamics
//! are deliberately omitted so modeled time is deterministic.

use tiervec_common::config::SsdConfig;

use crate::stats::{IoStats, IoStatsSnapshot};

/// Accumulator of modeled device-service time
pub struct SsdSimulator {
    config: SsdConfig,
    total_time_us: f64,
    stats: IoStats,
}

impl SsdSimulator {
    pub fn new(config: SsdConfig) -> Self {
        Self {
            config,
            total_time_us: 0.0,
            stats: IoStats::new(),
        }
    }

    /// Account one device read of `bytes`; returns the modeled service time.
    ///
    /// `service_time_us = (base_latency + bytes / (bandwidth_gbps * 1e3))
    ///                    / max(1, channels * queue_depth)`
    pub fn record_read(&mut self, bytes: u64) -> f64 {
        let parallelism = (self.config.channels as u64 * self.config.queue_depth as u64).max(1);
        let transfer_us = bytes as f64 / (self.config.bandwidth_gbps * 1e3);
        let service_time_us = (self.config.base_latency_us + transfer_us) / parallelism as f64;

        self.total_time_us += service_time_us;
        self.stats.record_read(bytes, service_time_us as u64);
        service_time_us
    }

    /// Accumulated device-service time in microseconds
    pub fn total_time_us(&self) -> f64 {
        self.total_time_us
    }

    pub fn config(&self) -> &SsdConfig {
        &self.config
    }

    pub fn stats(&self) -> IoStatsSnapshot {
        self.stats.snapshot()
    }

    /// Zero the accumulator and the embedded counters
    pub fn reset(&mut self) {
        self.total_time_us = 0.0;
        self.stats.reset();
    }
}
