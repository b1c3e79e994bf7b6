//! HNSW over a storage backend
//!
//! The graph algorithms are the ones in [`crate::hnsw`]; only payload access
//! differs. Adjacency stays in host memory; every vector read for a distance
//! computation goes through the backend, so in tiered deployments the DRAM
//! cache and SSD model see exactly the traffic the traversal generates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::warn;

use tiervec_common::config::IndexConfig;
use tiervec_common::error::{Error, Result};
use tiervec_common::types::{DistanceMetric, SearchResult, VectorId};

use tiervec_storage::StorageBackend;

use crate::distance::Distance;
use crate::hnsw::{validate_search_params, DistanceOracle, GraphTopology, HnswIndex};

/// Oracle that fetches payloads from a backend, with a per-query hot map.
///
/// Fetched payloads are kept as `Arc<[f32]>` for the duration of one query
/// (or one insert) so repeated distance computations against the same node
/// cost one backend read. Failed reads are remembered as failed; the node
/// scores `f32::INFINITY` and the query keeps going. The backend records the
/// failure in its own `io_errors` counter; `read_failures` here is the
/// index-level tally of candidates skipped this way.
struct BackendOracle<'a> {
    backend: &'a dyn StorageBackend,
    metric: DistanceMetric,
    target: &'a [f32],
    hot: HashMap<VectorId, Option<Arc<[f32]>>>,
    read_failures: u64,
}

impl<'a> BackendOracle<'a> {
    fn new(backend: &'a dyn StorageBackend, metric: DistanceMetric, target: &'a [f32]) -> Self {
        Self {
            backend,
            metric,
            target,
            hot: HashMap::new(),
            read_failures: 0,
        }
    }

    fn fetch(&mut self, id: VectorId) -> Option<Arc<[f32]>> {
        if let Some(cached) = self.hot.get(&id) {
            return cached.clone();
        }
        let fetched = match self.backend.read_node(id) {
            Ok(vector) => Some(Arc::<[f32]>::from(vector.into_boxed_slice())),
            Err(e) => {
                self.read_failures += 1;
                warn!(node = id, error = %e, "payload read failed; treating as unreachable");
                None
            }
        };
        self.hot.insert(id, fetched.clone());
        fetched
    }
}

impl DistanceOracle for BackendOracle<'_> {
    fn to_target(&mut self, id: VectorId) -> f32 {
        match self.fetch(id) {
            Some(v) => self.metric.distance(self.target, &v),
            None => f32::INFINITY,
        }
    }

    fn between(&mut self, a: VectorId, b: VectorId) -> f32 {
        let (Some(va), Some(vb)) = (self.fetch(a), self.fetch(b)) else {
            return f32::INFINITY;
        };
        self.metric.distance(&va, &vb)
    }
}

/// HNSW index whose payload reads go through a [`StorageBackend`]
pub struct TieredHnswIndex {
    config: IndexConfig,
    dimension: usize,
    graph: GraphTopology,
    backend: Arc<dyn StorageBackend>,
    rng: StdRng,
    read_failures: AtomicU64,
}

impl TieredHnswIndex {
    pub fn new(
        dimension: usize,
        config: IndexConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        config.validate()?;
        if dimension == 0 {
            return Err(Error::InvalidParameter("dimension must be >= 1".into()));
        }
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            dimension,
            graph: GraphTopology::new(),
            backend,
            rng,
            read_failures: AtomicU64::new(0),
        })
    }

    /// Attach a backend holding payloads to a previously persisted topology
    pub(crate) fn from_parts(
        config: IndexConfig,
        dimension: usize,
        graph: GraphTopology,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            dimension,
            graph,
            backend,
            rng,
            read_failures: AtomicU64::new(0),
        }
    }

    /// Write the payload through the backend and link the node.
    ///
    /// A `DimensionMismatch` from the backend is fatal for the build.
    pub fn insert(&mut self, vector: &[f32]) -> Result<VectorId> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let id = self.graph.len() as VectorId;
        self.backend.write_node(id, vector)?;

        let level = crate::hnsw::draw_level(&mut self.rng, self.config.level_mult());
        let pushed = self.graph.push_node(level);
        debug_assert_eq!(pushed, id);

        let mut oracle = BackendOracle::new(self.backend.as_ref(), self.config.metric, vector);
        self.graph.insert(&mut oracle, id, level, &self.config);
        self.read_failures
            .fetch_add(oracle.read_failures, Ordering::Relaxed);
        Ok(id)
    }

    /// k-NN search; payload reads route through the backend
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<SearchResult>> {
        validate_search_params(query.len(), self.dimension, k, ef)?;

        let mut oracle = BackendOracle::new(self.backend.as_ref(), self.config.metric, query);
        let results = self.graph.search(&mut oracle, k, ef);
        self.read_failures
            .fetch_add(oracle.read_failures, Ordering::Relaxed);
        Ok(results)
    }

    /// Search with the configured `ef_search`
    pub fn search_default(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.search(query, k, self.config.ef_search.max(k))
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Payload reads that failed and were scored as unreachable
    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn graph(&self) -> &GraphTopology {
        &self.graph
    }
}

/// Copy every payload of a dense index into a backend, id-for-id.
///
/// Used when migrating an in-memory build into a tiered deployment.
pub fn export_payloads(index: &HnswIndex, backend: &dyn StorageBackend) -> Result<()> {
    let dim = index.dimension();
    let arena = index.vector_arena();
    for id in 0..index.len() {
        backend.write_node(id as VectorId, &arena[id * dim..(id + 1) * dim])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiervec_common::config::{CacheConfig, SsdConfig};
    use tiervec_common::types::CachePolicyKind;
    use tiervec_storage::{MemoryBackend, TieredBackend};

    fn config() -> IndexConfig {
        IndexConfig {
            m: 4,
            ef_construction: 50,
            ef_search: 10,
            metric: DistanceMetric::L2,
            seed: 7,
        }
    }

    fn line_tiered(n: usize, capacity: usize) -> TieredHnswIndex {
        let backing = Arc::new(MemoryBackend::new());
        let cache = CacheConfig {
            capacity,
            policy: CachePolicyKind::Lru,
        };
        let tier = Arc::new(TieredBackend::new(backing, &cache, &SsdConfig::default()).unwrap());
        let mut index = TieredHnswIndex::new(2, config(), tier).unwrap();
        for i in 0..n {
            index.insert(&[i as f32, 0.0]).unwrap();
        }
        index
    }

    #[test]
    fn test_search_through_tier_matches_identity() {
        let index = line_tiered(10, 64);
        for i in 0..10u64 {
            let results = index.search(&[i as f32, 0.0], 1, 10).unwrap();
            assert_eq!(results[0].id, i);
        }
    }

    #[test]
    fn test_same_seed_same_results_as_dense() {
        let mut dense = HnswIndex::new(2, config()).unwrap();
        for i in 0..24 {
            dense.insert(&[i as f32, 0.0]).unwrap();
        }
        let tiered = line_tiered(24, 64);

        for i in 0..24u64 {
            let query = [i as f32 + 0.25, 0.0];
            let dense_hits = dense.search(&query, 3, 12).unwrap();
            let tiered_hits = tiered.search(&query, 3, 12).unwrap();
            assert_eq!(dense_hits, tiered_hits);
        }
    }

    #[test]
    fn test_cache_sees_payload_traffic() {
        let index = line_tiered(16, 4);
        let tier = index.backend().clone();
        // Downcast through the concrete constructor used in line_tiered.
        let stats_before = tier.stats();
        index.search(&[3.0, 0.0], 2, 8).unwrap();
        assert!(tier.stats().num_reads >= stats_before.num_reads);
    }

    #[test]
    fn test_missing_payload_is_skipped_not_fatal() {
        // Backend holds ids 0..8 but the graph claims an extra node: simulate
        // by building normally, then searching after the backing store loses
        // nothing (failure injection is covered via a sparse memory backend).
        let backing = Arc::new(MemoryBackend::new());
        let mut index = TieredHnswIndex::new(2, config(), backing.clone()).unwrap();
        for i in 0..8 {
            index.insert(&[i as f32, 0.0]).unwrap();
        }

        // Overwrite one payload with nothing by swapping in a fresh backend
        // that lacks id 3.
        let sparse = Arc::new(MemoryBackend::new());
        for i in 0..8u64 {
            if i != 3 {
                sparse.write_node(i, &[i as f32, 0.0]).unwrap();
            }
        }
        let index = TieredHnswIndex::from_parts(
            index.config.clone(),
            2,
            index.graph,
            sparse,
        );

        let results = index.search(&[3.0, 0.0], 2, 8).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.id != 3));
        assert!(index.read_failures() > 0);
        // The failure also lands in the backend's own counters, even for a
        // bare memory backend with no tier in front.
        assert!(index.backend().stats().io_errors > 0);
    }

    #[test]
    fn test_export_payloads_round_trip() {
        let mut dense = HnswIndex::new(2, config()).unwrap();
        for i in 0..6 {
            dense.insert(&[i as f32, 1.0]).unwrap();
        }
        let backend = MemoryBackend::new();
        export_payloads(&dense, &backend).unwrap();
        assert_eq!(backend.read_node(4).unwrap(), vec![4.0, 1.0]);
    }
}
