//! Storage backend trait

use tiervec_common::error::Result;
use tiervec_common::types::VectorId;

use crate::stats::IoStatsSnapshot;

/// Uniform read/write interface over a node-id-keyed vector store.
///
/// Implementations update their [`IoStats`](crate::stats::IoStats) success
/// counters on success paths; a failed read bumps `io_errors` so callers
/// that skip unreadable nodes still leave a trace in the backend's stats.
pub trait StorageBackend: Send + Sync {
    /// Fixed payload dimension, or 0 while no vector has been written yet
    fn dimension(&self) -> usize;

    /// Fetch the payload for `id`
    fn read_node(&self, id: VectorId) -> Result<Vec<f32>>;

    /// Store the payload for `id`
    fn write_node(&self, id: VectorId, vector: &[f32]) -> Result<()>;

    /// Fetch a payload per input id, in order.
    ///
    /// Per-id failures become `None`; they never abort the batch.
    fn batch_read_nodes(&self, ids: &[VectorId]) -> Vec<Option<Vec<f32>>> {
        ids.iter().map(|&id| self.read_node(id).ok()).collect()
    }

    /// Current counter values
    fn stats(&self) -> IoStatsSnapshot;

    /// Zero the counters
    fn reset_stats(&self);
}
