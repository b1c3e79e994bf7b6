//! Tiered backend: DRAM cache over a backing store

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use tiervec_common::config::{CacheConfig, SsdConfig};
use tiervec_common::error::Result;
use tiervec_common::metrics::{self, LatencyTimer};
use tiervec_common::types::VectorId;

use crate::backend::StorageBackend;
use crate::cache::VectorCache;
use crate::ssd::SsdSimulator;
use crate::stats::{IoStats, IoStatsSnapshot};

/// DRAM cache fronting a backing [`StorageBackend`], with an optional SSD
/// device model accounting the misses.
///
/// The lock covers only the cache and the device model; it is never held
/// across a backing-store read.
pub struct TieredBackend {
    backing: Arc<dyn StorageBackend>,
    state: Mutex<TieredState>,
    stats: IoStats,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

struct TieredState {
    cache: VectorCache,
    ssd: Option<SsdSimulator>,
}

/// Hit/miss/occupancy view of the cache tier
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheTierStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

impl CacheTierStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl TieredBackend {
    /// Build the tier over `backing`.
    ///
    /// `ssd.enabled` decides whether misses feed the device model.
    pub fn new(
        backing: Arc<dyn StorageBackend>,
        cache: &CacheConfig,
        ssd: &SsdConfig,
    ) -> Result<Self> {
        let cache = VectorCache::new(cache.policy, cache.capacity)?;
        let ssd = ssd.enabled.then(|| SsdSimulator::new(ssd.clone()));

        debug!(
            capacity = cache.capacity(),
            ssd_model = ssd.is_some(),
            "tiered backend ready"
        );

        Ok(Self {
            backing,
            state: Mutex::new(TieredState { cache, ssd }),
            stats: IoStats::new(),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    /// Modeled device-service time, or 0 when the SSD model is disabled
    pub fn device_time_us(&self) -> f64 {
        self.state
            .lock()
            .ssd
            .as_ref()
            .map_or(0.0, SsdSimulator::total_time_us)
    }

    pub fn cache_stats(&self) -> CacheTierStats {
        let state = self.state.lock();
        CacheTierStats {
            hits: self.cache_hits.load(Ordering::Relaxed),
            misses: self.cache_misses.load(Ordering::Relaxed),
            len: state.cache.len(),
            capacity: state.cache.capacity(),
        }
    }

    /// Account `bytes` of logical reads without touching the backing store.
    ///
    /// Used by analytic traversal modes that model block reads themselves.
    pub fn record_logical_read_bytes(&self, bytes: u64) {
        self.stats.record_read(bytes, 0);
        metrics::record_backend_read(bytes);
        if let Some(ssd) = &mut self.state.lock().ssd {
            ssd.record_read(bytes);
        }
    }

    /// Account `bytes` of logical writes without touching the backing store
    pub fn record_logical_write_bytes(&self, bytes: u64) {
        self.stats.record_write(bytes, 0);
        metrics::record_backend_write(bytes);
    }

    pub fn backing(&self) -> &Arc<dyn StorageBackend> {
        &self.backing
    }
}

impl StorageBackend for TieredBackend {
    fn dimension(&self) -> usize {
        self.backing.dimension()
    }

    fn read_node(&self, id: VectorId) -> Result<Vec<f32>> {
        // Cache probe under the lock.
        {
            let mut state = self.state.lock();
            if let Some(vector) = state.cache.get(id) {
                let vector = vector.to_vec();
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_access(true);
                return Ok(vector);
            }
        }

        // Miss: read the backing store with the lock released.
        let timer = LatencyTimer::start();
        let vector = match self.backing.read_node(id) {
            Ok(v) => v,
            Err(e) => {
                self.stats.record_error();
                return Err(e);
            }
        };
        let elapsed_us = timer.elapsed_us();
        let bytes = vector.len() as u64 * 4;

        self.stats.record_read(bytes, elapsed_us as u64);
        metrics::record_backend_read(bytes);
        metrics::record_backend_latency("read_node", elapsed_us);
        metrics::record_cache_access(false);

        let mut state = self.state.lock();
        if let Some(ssd) = &mut state.ssd {
            ssd.record_read(bytes);
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        if state.cache.insert(id, vector.clone()).is_some() {
            metrics::record_cache_eviction();
        }
        Ok(vector)
    }

    fn write_node(&self, id: VectorId, vector: &[f32]) -> Result<()> {
        let timer = LatencyTimer::start();
        self.backing.write_node(id, vector)?;
        let elapsed_us = timer.elapsed_us();
        let bytes = vector.len() as u64 * 4;

        self.stats.record_write(bytes, elapsed_us as u64);
        metrics::record_backend_write(bytes);

        // Write-through populates the cache.
        let mut state = self.state.lock();
        if state.cache.insert(id, vector.to_vec()).is_some() {
            metrics::record_cache_eviction();
        }
        Ok(())
    }

    fn stats(&self) -> IoStatsSnapshot {
        self.stats.snapshot()
    }

    fn reset_stats(&self) {
        self.stats.reset();
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        if let Some(ssd) = &mut self.state.lock().ssd {
            ssd.reset();
        }
    }
}
