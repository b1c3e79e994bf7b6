//! In-storage traversal: cheated and faithful modes

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use tiervec_common::config::AnnSsdConfig;
use tiervec_common::error::{Error, Result};
use tiervec_common::types::{AnnSsdMode, CodeType, DistanceMetric, SearchResult, VectorId};

use tiervec_index::distance::Distance;
use tiervec_index::HnswIndex;
use tiervec_storage::TieredBackend;

use crate::hardware::CostProfile;
use crate::layout::BlockLayout;

/// Ordered wrapper so distances can live in binary heaps
#[derive(Clone, Copy, PartialEq)]
struct OrderedFloat(f32);

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

/// Outcome of one simulated in-storage query
#[derive(Debug, Clone)]
pub struct AnnSsdSearch {
    /// Top-k hits sorted ascending by distance
    pub results: Vec<SearchResult>,
    /// Blocks the controller visited
    pub blocks_visited: usize,
    /// Distance evaluations the controller performed
    pub vectors_scored: usize,
    /// Modeled controller time in microseconds
    pub device_time_us: f64,
}

/// Simulator of graph traversal executed on the storage device.
///
/// Holds a flash image of the packed vectors plus the block layout; queries
/// never touch the host-resident index.
pub struct AnnSsdSimulator {
    config: AnnSsdConfig,
    profile: CostProfile,
    layout: BlockLayout,
    vectors: Vec<f32>,
    dimension: usize,
    metric: DistanceMetric,
    seed: u64,
}

impl AnnSsdSimulator {
    /// Pack `index` into the device layout described by `config`
    pub fn new(index: &HnswIndex, config: AnnSsdConfig, seed: u64) -> Result<Self> {
        let layout = BlockLayout::build(index, &config, seed)?;
        Ok(Self {
            profile: CostProfile::for_level(config.hw_level),
            layout,
            vectors: index.vector_arena().to_vec(),
            dimension: index.dimension(),
            metric: index.config().metric,
            seed,
            config,
        })
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn num_vectors(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    #[inline]
    fn vector(&self, id: VectorId) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    /// Run one in-storage query.
    ///
    /// `tier` receives a logical read per visited block in cheated mode so
    /// the SSD device model accounts the transfers.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        tier: Option<&TieredBackend>,
    ) -> Result<AnnSsdSearch> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Err(Error::InvalidParameter("k must be >= 1".into()));
        }
        if self.layout.num_blocks() == 0 {
            return Ok(AnnSsdSearch {
                results: Vec::new(),
                blocks_visited: 0,
                vectors_scored: 0,
                device_time_us: 0.0,
            });
        }

        let mut traversal = Traversal::new(self, query, k);
        while traversal.step() {}

        let results = match self.config.mode {
            AnnSsdMode::Faithful => traversal.top_k(),
            AnnSsdMode::Cheated => {
                // Correctness from a host-side scan of the visited blocks.
                if let Some(tier) = tier {
                    for _ in &traversal.visit_order {
                        tier.record_logical_read_bytes(self.layout.block_bytes(self.dimension));
                    }
                }
                self.host_scan(query, k, &traversal.visit_order)
            }
        };

        debug!(
            blocks = traversal.visit_order.len(),
            scored = traversal.vectors_scored,
            time_us = traversal.time_us,
            "in-storage query complete"
        );

        Ok(AnnSsdSearch {
            results,
            blocks_visited: traversal.visit_order.len(),
            vectors_scored: traversal.vectors_scored,
            device_time_us: traversal.time_us,
        })
    }

    /// Exact scan restricted to the visited blocks
    fn host_scan(&self, query: &[f32], k: usize, blocks: &[u32]) -> Vec<SearchResult> {
        let mut heap: BinaryHeap<(OrderedFloat, VectorId)> = BinaryHeap::new();
        for &block in blocks {
            for &id in self.layout.members(block) {
                let distance = self.metric.distance(query, self.vector(id));
                heap.push((OrderedFloat(distance), id));
                if heap.len() > k {
                    heap.pop();
                }
            }
        }
        into_sorted_results(heap)
    }
}

fn into_sorted_results(heap: BinaryHeap<(OrderedFloat, VectorId)>) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = heap
        .into_iter()
        .map(|(d, id)| SearchResult { id, distance: d.0 })
        .collect();
    results.sort_by(|a, b| {
        OrderedFloat(a.distance)
            .cmp(&OrderedFloat(b.distance))
            .then(a.id.cmp(&b.id))
    });
    results
}

// ============================================================================
// Controller state machine
// ============================================================================

/// Controller phases for one block visit
enum ControllerState {
    FetchBlock,
    Score,
    UpdateTopK,
    SelectPortal,
    Done,
}

/// One in-flight traversal: fetch -> score -> update top-k -> select portal
struct Traversal<'a> {
    sim: &'a AnnSsdSimulator,
    query: &'a [f32],
    k: usize,
    state: ControllerState,
    current_block: u32,
    visited: Vec<bool>,
    visit_order: Vec<u32>,
    /// Distances computed for the current block
    scored: Vec<(f32, VectorId)>,
    /// Global top-k, max-heap bounded at k
    top: BinaryHeap<(OrderedFloat, VectorId)>,
    /// Candidate next blocks keyed by their portal owner's distance
    frontier: BinaryHeap<Reverse<(OrderedFloat, u32)>>,
    vectors_scored: usize,
    time_us: f64,
}

impl<'a> Traversal<'a> {
    fn new(sim: &'a AnnSsdSimulator, query: &'a [f32], k: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(sim.seed);
        let start = rng.gen_range(0..sim.layout.num_blocks()) as u32;
        Self {
            sim,
            query,
            k,
            state: ControllerState::FetchBlock,
            current_block: start,
            visited: vec![false; sim.layout.num_blocks()],
            visit_order: Vec::new(),
            scored: Vec::new(),
            top: BinaryHeap::new(),
            frontier: BinaryHeap::new(),
            vectors_scored: 0,
            time_us: 0.0,
        }
    }

    /// Advance one controller phase; false once the walk is done
    fn step(&mut self) -> bool {
        match self.state {
            ControllerState::FetchBlock => {
                self.visited[self.current_block as usize] = true;
                self.visit_order.push(self.current_block);
                self.time_us += self.sim.profile.block_overhead_us;
                self.state = ControllerState::Score;
            }
            ControllerState::Score => {
                self.score_current_block();
                self.state = ControllerState::UpdateTopK;
            }
            ControllerState::UpdateTopK => {
                for &(distance, id) in &self.scored {
                    self.top.push((OrderedFloat(distance), id));
                    if self.top.len() > self.k {
                        self.top.pop();
                    }
                }
                self.state = ControllerState::SelectPortal;
            }
            ControllerState::SelectPortal => match self.select_next_block() {
                Some(next) => {
                    self.current_block = next;
                    self.state = ControllerState::FetchBlock;
                }
                None => self.state = ControllerState::Done,
            },
            ControllerState::Done => return false,
        }
        !matches!(self.state, ControllerState::Done)
    }

    /// Score block members, through the micro-index when configured
    fn score_current_block(&mut self) {
        let sim = self.sim;
        let block = self.current_block;
        self.scored.clear();

        match sim.layout.clusters(block) {
            Some(clusters) if sim.config.code_type == CodeType::MicroIndex => {
                // Centroid pass, then a refined pass over the best quarter.
                let mut ranked: Vec<(f32, usize)> = clusters
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (sim.metric.distance(self.query, &c.centroid), i))
                    .collect();
                self.vectors_scored += ranked.len();
                ranked.sort_by(|a, b| OrderedFloat(a.0).cmp(&OrderedFloat(b.0)));

                let keep = ranked.len().div_ceil(4);
                for &(_, cluster_idx) in ranked.iter().take(keep) {
                    for &id in &clusters[cluster_idx].members {
                        let distance = sim.metric.distance(self.query, sim.vector(id));
                        self.scored.push((distance, id));
                    }
                }
                self.vectors_scored += self.scored.len();
                self.time_us += sim
                    .profile
                    .score_time_us(ranked.len() + self.scored.len(), sim.dimension);
            }
            _ => {
                for &id in sim.layout.members(block) {
                    let distance = sim.metric.distance(self.query, sim.vector(id));
                    self.scored.push((distance, id));
                }
                self.vectors_scored += self.scored.len();
                self.time_us += sim.profile.score_time_us(self.scored.len(), sim.dimension);
            }
        }
    }

    /// Best unvisited portal target from the frontier, honoring the budget
    fn select_next_block(&mut self) -> Option<u32> {
        let max_steps = self.sim.config.max_steps;
        if max_steps != 0 && self.visit_order.len() >= max_steps {
            return None;
        }

        // Portals of every node scored in this block join the frontier.
        for &(distance, id) in &self.scored {
            for &target in self.sim.layout.portals(id) {
                let block = self.sim.layout.block_of(target);
                if !self.visited[block as usize] {
                    self.frontier
                        .push(Reverse((OrderedFloat(distance), block)));
                }
            }
        }

        while let Some(Reverse((_, block))) = self.frontier.pop() {
            if !self.visited[block as usize] {
                return Some(block);
            }
        }

        // Full traversal keeps going until every block was seen.
        if max_steps == 0 {
            return self
                .visited
                .iter()
                .position(|&seen| !seen)
                .map(|block| block as u32);
        }
        None
    }

    fn top_k(&self) -> Vec<SearchResult> {
        into_sorted_results(self.top.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiervec_common::config::IndexConfig;
    use tiervec_common::types::{HardwareLevel, PlacementMode};
    use tiervec_index::recall::{brute_force_knn, recall_at_k};

    fn grid_index(n: usize) -> HnswIndex {
        let config = IndexConfig {
            m: 8,
            ef_construction: 100,
            ef_search: 32,
            metric: DistanceMetric::L2,
            seed: 11,
        };
        let mut index = HnswIndex::new(2, config).unwrap();
        for i in 0..n {
            // 2-D grid walk keeps neighbors meaningful.
            index
                .insert(&[(i % 32) as f32, (i / 32) as f32])
                .unwrap();
        }
        index
    }

    fn ann_config(mode: AnnSsdMode, max_steps: usize, code_type: CodeType) -> AnnSsdConfig {
        AnnSsdConfig {
            mode,
            hw_level: HardwareLevel::L1,
            vectors_per_block: 32,
            portal_degree: 4,
            max_steps,
            placement: PlacementMode::Sequential,
            code_type,
        }
    }

    #[test]
    fn test_full_traversal_matches_brute_force() {
        let index = grid_index(256);
        for mode in [AnnSsdMode::Cheated, AnnSsdMode::Faithful] {
            let sim =
                AnnSsdSimulator::new(&index, ann_config(mode, 0, CodeType::None), 5).unwrap();
            let query = [7.3, 3.1];
            let got = sim.search(&query, 10, None).unwrap();
            let truth = brute_force_knn(index.vector_arena(), 2, &query, 10, DistanceMetric::L2);

            let got_ids: Vec<VectorId> = got.results.iter().map(|r| r.id).collect();
            let truth_ids: Vec<VectorId> = truth.iter().map(|r| r.id).collect();
            assert_eq!(
                recall_at_k(&got_ids, &truth_ids),
                1.0,
                "mode {:?} must equal brute force on full traversal",
                mode
            );
            assert_eq!(got.blocks_visited, sim.layout().num_blocks());
        }
    }

    #[test]
    fn test_budget_limits_block_visits() {
        let index = grid_index(256);
        let sim = AnnSsdSimulator::new(
            &index,
            ann_config(AnnSsdMode::Faithful, 3, CodeType::None),
            5,
        )
        .unwrap();
        let got = sim.search(&[1.0, 1.0], 5, None).unwrap();
        assert!(got.blocks_visited <= 3);
        assert!(got.device_time_us > 0.0);
    }

    #[test]
    fn test_modes_agree_without_micro_index() {
        let index = grid_index(256);
        let query = [15.0, 4.0];

        let cheated = AnnSsdSimulator::new(
            &index,
            ann_config(AnnSsdMode::Cheated, 4, CodeType::None),
            9,
        )
        .unwrap()
        .search(&query, 8, None)
        .unwrap();

        let faithful = AnnSsdSimulator::new(
            &index,
            ann_config(AnnSsdMode::Faithful, 4, CodeType::None),
            9,
        )
        .unwrap()
        .search(&query, 8, None)
        .unwrap();

        let a: Vec<VectorId> = cheated.results.iter().map(|r| r.id).collect();
        let b: Vec<VectorId> = faithful.results.iter().map(|r| r.id).collect();
        assert_eq!(a, b);
        assert_eq!(cheated.blocks_visited, faithful.blocks_visited);
    }

    #[test]
    fn test_micro_index_prunes_scoring() {
        let index = grid_index(256);
        let query = [3.0, 3.0];

        let full = AnnSsdSimulator::new(
            &index,
            ann_config(AnnSsdMode::Faithful, 0, CodeType::None),
            5,
        )
        .unwrap()
        .search(&query, 5, None)
        .unwrap();

        let pruned = AnnSsdSimulator::new(
            &index,
            ann_config(AnnSsdMode::Faithful, 0, CodeType::MicroIndex),
            5,
        )
        .unwrap()
        .search(&query, 5, None)
        .unwrap();

        assert!(pruned.vectors_scored < full.vectors_scored);
        assert!(pruned.device_time_us < full.device_time_us);
    }

    #[test]
    fn test_hardware_level_orders_device_time() {
        let index = grid_index(256);
        let mut times = Vec::new();
        for level in [
            HardwareLevel::L0,
            HardwareLevel::L1,
            HardwareLevel::L2,
            HardwareLevel::L3,
        ] {
            let mut config = ann_config(AnnSsdMode::Faithful, 0, CodeType::None);
            config.hw_level = level;
            let sim = AnnSsdSimulator::new(&index, config, 5).unwrap();
            times.push(sim.search(&[2.0, 2.0], 5, None).unwrap().device_time_us);
        }
        assert!(times[0] > times[1]);
        assert!(times[1] > times[2]);
        assert!(times[2] > times[3]);
    }

    #[test]
    fn test_cheated_mode_feeds_tier_device_model() {
        use std::sync::Arc;
        use tiervec_common::config::{CacheConfig, SsdConfig};
        use tiervec_common::types::CachePolicyKind;
        use tiervec_storage::{MemoryBackend, StorageBackend, TieredBackend};

        let index = grid_index(128);
        let backing = Arc::new(MemoryBackend::new());
        backing.write_node(0, &[0.0, 0.0]).unwrap();
        let tier = TieredBackend::new(
            backing,
            &CacheConfig {
                capacity: 16,
                policy: CachePolicyKind::Lru,
            },
            &SsdConfig {
                enabled: true,
                ..SsdConfig::default()
            },
        )
        .unwrap();

        let sim = AnnSsdSimulator::new(
            &index,
            ann_config(AnnSsdMode::Cheated, 2, CodeType::None),
            5,
        )
        .unwrap();
        sim.search(&[1.0, 1.0], 5, Some(&tier)).unwrap();

        assert!(tier.device_time_us() > 0.0);
        assert_eq!(tier.stats().num_reads, 2);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let index = grid_index(64);
        let sim = AnnSsdSimulator::new(
            &index,
            ann_config(AnnSsdMode::Cheated, 0, CodeType::None),
            5,
        )
        .unwrap();
        assert!(sim.search(&[1.0, 1.0], 0, None).is_err());
        assert!(sim.search(&[1.0], 5, None).is_err());
    }
}
