//! Hierarchical navigable small-world index
//!
//! The graph is a pointer-free arena: per-node levels plus ragged neighbor
//! lists of plain ids. Build and search are written once against a
//! [`DistanceOracle`] so the tiered index reuses them with payload reads
//! routed through a storage backend.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use tiervec_common::config::IndexConfig;
use tiervec_common::error::{Error, Result};
use tiervec_common::types::{DistanceMetric, SearchResult, VectorId};

use crate::distance::Distance;

/// Hard cap on level assignment; keeps layer arrays small and matches the
/// u32 level field of the persistent format.
pub(crate) const MAX_LEVEL: u32 = 31;

// ============================================================================
// Distance oracle
// ============================================================================

/// Distance source for one build step or one query.
///
/// `to_target` measures from the current query (or the vector being
/// inserted) to a stored node; `between` measures between two stored nodes.
/// A failed payload read reports `f32::INFINITY`, which drops the node out
/// of every selection without stopping the walk.
pub trait DistanceOracle {
    fn to_target(&mut self, id: VectorId) -> f32;
    fn between(&mut self, a: VectorId, b: VectorId) -> f32;
}

/// Ordered wrapper so distances can live in binary heaps
#[derive(Clone, Copy, PartialEq)]
pub(crate) struct OrderedFloat(pub f32);

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .partial_cmp(&other.0)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

// ============================================================================
// Graph topology
// ============================================================================

/// Arena-style adjacency: levels and ragged per-layer neighbor lists
#[derive(Debug)]
pub(crate) struct GraphTopology {
    /// Top layer of each node
    pub(crate) levels: Vec<u32>,
    /// `neighbors[node][layer]` for `layer in 0..=levels[node]`
    pub(crate) neighbors: Vec<Vec<Vec<VectorId>>>,
    /// Node at the top non-empty layer
    pub(crate) entry_point: Option<VectorId>,
    /// Highest assigned level
    pub(crate) max_level: u32,
}

impl GraphTopology {
    pub(crate) fn new() -> Self {
        Self {
            levels: Vec::new(),
            neighbors: Vec::new(),
            entry_point: None,
            max_level: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.levels.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn neighbors_at(&self, id: VectorId, layer: u32) -> &[VectorId] {
        &self.neighbors[id as usize][layer as usize]
    }

    /// Append an unconnected node at `level`; ids are assigned densely
    pub(crate) fn push_node(&mut self, level: u32) -> VectorId {
        let id = self.levels.len() as VectorId;
        self.levels.push(level);
        self.neighbors
            .push((0..=level).map(|_| Vec::new()).collect());
        id
    }

    /// Greedy nearest-only walk inside one layer
    fn greedy_step<O: DistanceOracle>(
        &self,
        oracle: &mut O,
        mut current: (f32, VectorId),
        layer: u32,
    ) -> (f32, VectorId) {
        loop {
            let mut improved = false;
            for &neighbor in self.neighbors_at(current.1, layer) {
                let dist = oracle.to_target(neighbor);
                if dist < current.0 {
                    current = (dist, neighbor);
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Bounded best-first search inside one layer.
    ///
    /// Returns up to `ef` nodes sorted ascending by distance to the target.
    fn search_layer<O: DistanceOracle>(
        &self,
        oracle: &mut O,
        entries: &[(f32, VectorId)],
        ef: usize,
        layer: u32,
    ) -> Vec<(f32, VectorId)> {
        let mut visited = vec![false; self.len()];
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat, VectorId)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat, VectorId)> = BinaryHeap::new();

        for &(dist, id) in entries {
            if !visited[id as usize] {
                visited[id as usize] = true;
                candidates.push(Reverse((OrderedFloat(dist), id)));
                results.push((OrderedFloat(dist), id));
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        while let Some(Reverse((OrderedFloat(dist), id))) = candidates.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |(d, _)| d.0);
            if dist > worst && results.len() >= ef {
                break;
            }

            for &neighbor in self.neighbors_at(id, layer) {
                if visited[neighbor as usize] {
                    continue;
                }
                visited[neighbor as usize] = true;

                let d = oracle.to_target(neighbor);
                if results.len() < ef || d < worst {
                    candidates.push(Reverse((OrderedFloat(d), neighbor)));
                    results.push((OrderedFloat(d), neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(f32, VectorId)> =
            results.into_iter().map(|(d, id)| (d.0, id)).collect();
        out.sort_by(|a, b| OrderedFloat(a.0).cmp(&OrderedFloat(b.0)));
        out
    }

    /// Diversity-preserving neighbor selection.
    ///
    /// Candidates arrive sorted ascending; `c` is accepted only while nearer
    /// to the target than to every already-accepted neighbor.
    fn select_neighbors<O: DistanceOracle>(
        oracle: &mut O,
        candidates: &[(f32, VectorId)],
        cap: usize,
    ) -> Vec<(f32, VectorId)> {
        let mut selected: Vec<(f32, VectorId)> = Vec::with_capacity(cap);
        for &(dist, id) in candidates {
            if selected.len() >= cap {
                break;
            }
            let diverse = selected
                .iter()
                .all(|&(_, kept)| dist < oracle.between(id, kept));
            if diverse {
                selected.push((dist, id));
            }
        }
        selected
    }

    /// Re-run the selection heuristic on an overflowed neighbor list
    fn shrink_neighbors<O: DistanceOracle>(
        &mut self,
        oracle: &mut O,
        node: VectorId,
        layer: u32,
        cap: usize,
    ) {
        let list = &self.neighbors[node as usize][layer as usize];
        let mut scored: Vec<(f32, VectorId)> = list
            .iter()
            .map(|&n| (oracle.between(node, n), n))
            .collect();
        scored.sort_by(|a, b| OrderedFloat(a.0).cmp(&OrderedFloat(b.0)));

        // Selection relative to `node` itself: target distance and pairwise
        // distance both come from `between`.
        let mut kept: Vec<VectorId> = Vec::with_capacity(cap);
        for &(dist, candidate) in &scored {
            if kept.len() >= cap {
                break;
            }
            let diverse = kept
                .iter()
                .all(|&k| dist < oracle.between(candidate, k));
            if diverse {
                kept.push(candidate);
            }
        }
        self.neighbors[node as usize][layer as usize] = kept;
    }

    /// Insert a node that is already stored at `id` into the graph
    pub(crate) fn insert<O: DistanceOracle>(
        &mut self,
        oracle: &mut O,
        id: VectorId,
        level: u32,
        config: &IndexConfig,
    ) {
        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            return;
        };

        let mut current = (oracle.to_target(entry), entry);

        // Nearest-only descent through the layers above the new node.
        let mut layer = self.max_level;
        while layer > level {
            current = self.greedy_step(oracle, current, layer);
            layer -= 1;
        }

        // Connect from min(level, max_level) down to the base layer.
        let mut entries = vec![current];
        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates =
                self.search_layer(oracle, &entries, config.ef_construction, layer);
            let cap = if layer == 0 {
                config.m_max0()
            } else {
                config.m
            };
            let selected = Self::select_neighbors(oracle, &candidates, cap);

            for &(_, neighbor) in &selected {
                self.neighbors[id as usize][layer as usize].push(neighbor);
                let list = &mut self.neighbors[neighbor as usize][layer as usize];
                list.push(id);
                if list.len() > cap {
                    self.shrink_neighbors(oracle, neighbor, layer, cap);
                }
            }
            entries = candidates;
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
            debug!(node = id, level, "entry point promoted");
        }
    }

    /// k-NN search; returns up to `k` hits sorted ascending by distance
    pub(crate) fn search<O: DistanceOracle>(
        &self,
        oracle: &mut O,
        k: usize,
        ef: usize,
    ) -> Vec<SearchResult> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };

        let mut current = (oracle.to_target(entry), entry);
        for layer in (1..=self.max_level).rev() {
            current = self.greedy_step(oracle, current, layer);
        }

        let found = self.search_layer(oracle, &[current], ef, 0);
        found
            .into_iter()
            .take(k)
            .map(|(distance, id)| SearchResult { id, distance })
            .collect()
    }
}

// ============================================================================
// Dense in-memory index
// ============================================================================

/// Oracle over a flat payload arena
struct DenseOracle<'a> {
    vectors: &'a [f32],
    dimension: usize,
    metric: DistanceMetric,
    target: &'a [f32],
}

impl DenseOracle<'_> {
    #[inline]
    fn vector(&self, id: VectorId) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }
}

impl DistanceOracle for DenseOracle<'_> {
    #[inline]
    fn to_target(&mut self, id: VectorId) -> f32 {
        self.metric.distance(self.target, self.vector(id))
    }

    #[inline]
    fn between(&mut self, a: VectorId, b: VectorId) -> f32 {
        self.metric.distance(self.vector(a), self.vector(b))
    }
}

/// In-memory HNSW index with payloads in a flat arena
#[derive(Debug)]
pub struct HnswIndex {
    config: IndexConfig,
    dimension: usize,
    graph: GraphTopology,
    vectors: Vec<f32>,
    rng: StdRng,
}

impl HnswIndex {
    pub fn new(dimension: usize, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        if dimension == 0 {
            return Err(Error::InvalidParameter("dimension must be >= 1".into()));
        }
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            dimension,
            graph: GraphTopology::new(),
            vectors: Vec::new(),
            rng,
        })
    }

    /// Rebuild an index from previously persisted parts
    pub(crate) fn from_parts(
        config: IndexConfig,
        dimension: usize,
        graph: GraphTopology,
        vectors: Vec<f32>,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            dimension,
            graph,
            vectors,
            rng,
        }
    }

    /// Append one vector; a `DimensionMismatch` is fatal for the build
    pub fn insert(&mut self, vector: &[f32]) -> Result<VectorId> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let level = draw_level(&mut self.rng, self.config.level_mult());
        let id = self.graph.push_node(level);
        self.vectors.extend_from_slice(vector);

        let mut oracle = DenseOracle {
            vectors: &self.vectors,
            dimension: self.dimension,
            metric: self.config.metric,
            target: vector,
        };
        self.graph.insert(&mut oracle, id, level, &self.config);
        Ok(id)
    }

    /// k-NN search with an explicit effort knob.
    ///
    /// Returns up to `k` ids sorted ascending by distance; fewer when the
    /// graph is smaller than `k`.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<SearchResult>> {
        validate_search_params(query.len(), self.dimension, k, ef)?;

        let mut oracle = DenseOracle {
            vectors: &self.vectors,
            dimension: self.dimension,
            metric: self.config.metric,
            target: query,
        };
        Ok(self.graph.search(&mut oracle, k, ef))
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

    /// Payload slice for a stored node
    pub fn vector(&self, id: VectorId) -> Option<&[f32]> {
        if (id as usize) < self.graph.len() {
            let start = id as usize * self.dimension;
            Some(&self.vectors[start..start + self.dimension])
        } else {
            None
        }
    }

    /// Flat payload arena (row-major, `len * dimension`)
    pub fn vector_arena(&self) -> &[f32] {
        &self.vectors
    }

    /// Neighbor list of `id` at `layer`, if the node reaches that layer
    pub fn neighbors_at(&self, id: VectorId, layer: u32) -> Option<&[VectorId]> {
        self.graph
            .neighbors
            .get(id as usize)
            .and_then(|layers| layers.get(layer as usize))
            .map(Vec::as_slice)
    }

    pub(crate) fn graph(&self) -> &GraphTopology {
        &self.graph
    }
}

/// Geometric level draw with parameter `mL = 1/ln(M)`
pub(crate) fn draw_level(rng: &mut StdRng, level_mult: f64) -> u32 {
    // U in (0, 1]: gen() yields [0, 1).
    let u: f64 = 1.0 - rng.gen::<f64>();
    let level = (-u.ln() * level_mult) as u32;
    level.min(MAX_LEVEL)
}

pub(crate) fn validate_search_params(
    query_len: usize,
    dimension: usize,
    k: usize,
    ef: usize,
) -> Result<()> {
    if query_len != dimension {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            actual: query_len,
        });
    }
    if k == 0 {
        return Err(Error::InvalidParameter("k must be >= 1".into()));
    }
    if ef < k {
        return Err(Error::InvalidParameter(format!(
            "ef ({}) must be >= k ({})",
            ef, k
        )));
    }
    Ok(())
}
