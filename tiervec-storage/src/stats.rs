//! Per-backend I/O statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotone I/O counters for one storage backend.
///
/// Individual fields are atomic; a snapshot taken while operations are in
/// flight may be momentarily inconsistent across fields. Callers that need a
/// consistent view must quiesce the backend or `reset` under exclusive access.
#[derive(Default)]
pub struct IoStats {
    num_reads: AtomicU64,
    num_writes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    read_latency_us: AtomicU64,
    write_latency_us: AtomicU64,
    io_errors: AtomicU64,
}

impl IoStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful read of `bytes` taking `latency_us`
    pub fn record_read(&self, bytes: u64, latency_us: u64) {
        self.num_reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.read_latency_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    /// Record one successful write of `bytes` taking `latency_us`
    pub fn record_write(&self, bytes: u64, latency_us: u64) {
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.write_latency_us.fetch_add(latency_us, Ordering::Relaxed);
    }

    /// Record a failed I/O operation
    pub fn record_error(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.num_reads.store(0, Ordering::Relaxed);
        self.num_writes.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.read_latency_us.store(0, Ordering::Relaxed);
        self.write_latency_us.store(0, Ordering::Relaxed);
        self.io_errors.store(0, Ordering::Relaxed);
    }

    /// Load every counter
    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            num_reads: self.num_reads.load(Ordering::Relaxed),
            num_writes: self.num_writes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            read_latency_us: self.read_latency_us.load(Ordering::Relaxed),
            write_latency_us: self.write_latency_us.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }

    pub fn io_errors(&self) -> u64 {
        self.io_errors.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of [`IoStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    pub num_reads: u64,
    pub num_writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_latency_us: u64,
    pub write_latency_us: u64,
    pub io_errors: u64,
}

impl IoStatsSnapshot {
    /// Mean read latency in microseconds
    pub fn avg_read_latency_us(&self) -> f64 {
        if self.num_reads == 0 {
            0.0
        } else {
            self.read_latency_us as f64 / self.num_reads as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = IoStats::new();
        stats.record_read(512, 10);
        stats.record_read(512, 30);
        stats.record_write(1024, 5);

        let snap = stats.snapshot();
        assert_eq!(snap.num_reads, 2);
        assert_eq!(snap.bytes_read, 1024);
        assert_eq!(snap.num_writes, 1);
        assert_eq!(snap.bytes_written, 1024);
        assert!((snap.avg_read_latency_us() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let stats = IoStats::new();
        stats.record_read(100, 1);
        stats.record_error();
        stats.reset();
        assert_eq!(stats.snapshot(), IoStatsSnapshot::default());
    }
}
