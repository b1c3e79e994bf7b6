//! In-memory storage backend

use parking_lot::Mutex;

use tiervec_common::error::{Error, Result};
use tiervec_common::types::VectorId;

use crate::backend::StorageBackend;
use crate::stats::{IoStats, IoStatsSnapshot};

/// Dense, sparse-tolerant in-process vector store.
///
/// Payloads live in an indexable slot array with a presence bitmap; writes
/// grow both on demand. All access is serialized by one mutex.
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
    stats: IoStats,
}

struct MemoryInner {
    slots: Vec<Vec<f32>>,
    present: Vec<u64>,
    dimension: usize,
}

impl MemoryInner {
    fn is_present(&self, id: usize) -> bool {
        self.present
            .get(id / 64)
            .map_or(false, |word| word & (1 << (id % 64)) != 0)
    }

    fn mark_present(&mut self, id: usize) {
        let word = id / 64;
        if word >= self.present.len() {
            self.present.resize(word + 1, 0);
        }
        self.present[word] |= 1 << (id % 64);
    }
}

impl MemoryBackend {
    /// Create an empty store; the dimension is adopted from the first write
    pub fn new() -> Self {
        Self::with_dimension(0)
    }

    /// Create an empty store with a fixed dimension
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                slots: Vec::new(),
                present: Vec::new(),
                dimension,
            }),
            stats: IoStats::new(),
        }
    }

    /// Number of present vectors
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .present
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn dimension(&self) -> usize {
        self.inner.lock().dimension
    }

    fn read_node(&self, id: VectorId) -> Result<Vec<f32>> {
        let inner = self.inner.lock();
        let slot = id as usize;
        if !inner.is_present(slot) {
            drop(inner);
            self.stats.record_error();
            return Err(Error::NotFound(id));
        }
        let vector = inner.slots[slot].clone();
        drop(inner);

        self.stats.record_read(vector.len() as u64 * 4, 0);
        Ok(vector)
    }

    fn write_node(&self, id: VectorId, vector: &[f32]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.dimension == 0 {
            inner.dimension = vector.len();
        } else if vector.len() != inner.dimension {
            return Err(Error::DimensionMismatch {
                expected: inner.dimension,
                actual: vector.len(),
            });
        }

        let slot = id as usize;
        if slot >= inner.slots.len() {
            inner.slots.resize_with(slot + 1, Vec::new);
        }
        inner.slots[slot] = vector.to_vec();
        inner.mark_present(slot);
        drop(inner);

        self.stats.record_write(vector.len() as u64 * 4, 0);
        Ok(())
    }

    fn stats(&self) -> IoStatsSnapshot {
        self.stats.snapshot()
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let backend = MemoryBackend::new();
        backend.write_node(3, &[1.0, 2.0, 3.0]).unwrap();

        assert_eq!(backend.read_node(3).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(backend.dimension(), 3);
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_absent_slot_is_not_found() {
        let backend = MemoryBackend::new();
        backend.write_node(5, &[0.0, 0.0]).unwrap();

        // Slot 2 exists in the grown array but was never written.
        assert!(matches!(backend.read_node(2), Err(Error::NotFound(2))));
        assert!(matches!(backend.read_node(100), Err(Error::NotFound(100))));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let backend = MemoryBackend::new();
        backend.write_node(0, &[1.0, 2.0]).unwrap();
        assert!(matches!(
            backend.write_node(1, &[1.0, 2.0, 3.0]),
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_batch_read_absorbs_missing_ids() {
        let backend = MemoryBackend::new();
        backend.write_node(0, &[1.0]).unwrap();
        backend.write_node(2, &[3.0]).unwrap();

        let results = backend.batch_read_nodes(&[0, 1, 2]);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Some(vec![1.0]));
        assert_eq!(results[1], None);
        assert_eq!(results[2], Some(vec![3.0]));
    }

    #[test]
    fn test_counters_split_successes_and_errors() {
        let backend = MemoryBackend::new();
        backend.write_node(0, &[1.0, 2.0]).unwrap();
        let _ = backend.read_node(0);
        let _ = backend.read_node(9);

        let snap = backend.stats();
        assert_eq!(snap.num_writes, 1);
        // The failed read counts as an error, not as a read.
        assert_eq!(snap.num_reads, 1);
        assert_eq!(snap.bytes_read, 8);
        assert_eq!(snap.io_errors, 1);
    }
}
