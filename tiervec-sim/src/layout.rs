//! Block layout: packing, portals, micro-index

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use tiervec_common::config::AnnSsdConfig;
use tiervec_common::error::{Error, Result};
use tiervec_common::types::{CodeType, PlacementMode, VectorId};

use tiervec_index::HnswIndex;

/// Cluster summary inside one block's micro-index
pub struct Cluster {
    /// Mean of the member payloads
    pub centroid: Vec<f32>,
    /// Member ids, all residents of the owning block
    pub members: Vec<VectorId>,
}

/// Members per micro-index cluster
const CLUSTER_SIZE: usize = 16;

/// Fixed-size packing of the node set into device blocks.
///
/// Every node carries up to `portal_degree` edges into other blocks; graph
/// neighbors are preferred as targets, the remainder is seeded-random.
pub struct BlockLayout {
    vectors_per_block: usize,
    block_of: Vec<u32>,
    members: Vec<Vec<VectorId>>,
    portals: Vec<Vec<VectorId>>,
    micro_index: Option<Vec<Vec<Cluster>>>,
}

impl BlockLayout {
    /// Pack `index` into blocks per `config`
    pub fn build(index: &HnswIndex, config: &AnnSsdConfig, seed: u64) -> Result<Self> {
        if config.vectors_per_block == 0 {
            return Err(Error::InvalidParameter(
                "vectors_per_block must be >= 1".into(),
            ));
        }
        let n = index.len();
        let kpb = config.vectors_per_block;

        let order = match config.placement {
            PlacementMode::Sequential => (0..n as VectorId).collect::<Vec<_>>(),
            PlacementMode::LocalityAware => locality_order(index),
        };

        let mut block_of = vec![0u32; n];
        let mut members: Vec<Vec<VectorId>> = Vec::with_capacity(n.div_ceil(kpb));
        for chunk in order.chunks(kpb) {
            let block = members.len() as u32;
            for &id in chunk {
                block_of[id as usize] = block;
            }
            members.push(chunk.to_vec());
        }

        let portals = build_portals(index, &block_of, config.portal_degree, seed);

        let micro_index = (config.code_type == CodeType::MicroIndex)
            .then(|| build_micro_index(index, &members));

        debug!(
            nodes = n,
            blocks = members.len(),
            kpb,
            placement = ?config.placement,
            "block layout built"
        );

        Ok(Self {
            vectors_per_block: kpb,
            block_of,
            members,
            portals,
            micro_index,
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.members.len()
    }

    pub fn vectors_per_block(&self) -> usize {
        self.vectors_per_block
    }

    /// Ids resident in `block`
    pub fn members(&self, block: u32) -> &[VectorId] {
        &self.members[block as usize]
    }

    pub fn block_of(&self, id: VectorId) -> u32 {
        self.block_of[id as usize]
    }

    /// Out-of-block portal targets of `id`
    pub fn portals(&self, id: VectorId) -> &[VectorId] {
        &self.portals[id as usize]
    }

    /// Micro-index clusters of `block`, when built
    pub fn clusters(&self, block: u32) -> Option<&[Cluster]> {
        self.micro_index
            .as_ref()
            .map(|blocks| blocks[block as usize].as_slice())
    }

    /// Bytes one block transfer moves (payload only)
    pub fn block_bytes(&self, dimension: usize) -> u64 {
        (self.vectors_per_block * dimension * 4) as u64
    }
}

/// Visit order that co-locates layer-0 neighbors: BFS from node 0, isolated
/// remainders appended in id order.
fn locality_order(index: &HnswIndex) -> Vec<VectorId> {
    let n = index.len();
    let mut order = Vec::with_capacity(n);
    let mut seen = vec![false; n];

    for root in 0..n as VectorId {
        if seen[root as usize] {
            continue;
        }
        seen[root as usize] = true;
        let mut queue = std::collections::VecDeque::from([root]);
        while let Some(node) = queue.pop_front() {
            order.push(node);
            if let Some(neighbors) = index.neighbors_at(node, 0) {
                for &next in neighbors {
                    if !seen[next as usize] {
                        seen[next as usize] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
    }
    order
}

fn build_portals(
    index: &HnswIndex,
    block_of: &[u32],
    portal_degree: usize,
    seed: u64,
) -> Vec<Vec<VectorId>> {
    let n = block_of.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut portals = Vec::with_capacity(n);

    for id in 0..n as VectorId {
        let home = block_of[id as usize];
        let mut targets: Vec<VectorId> = Vec::with_capacity(portal_degree);

        // Graph neighbors living in other blocks come first.
        if let Some(neighbors) = index.neighbors_at(id, 0) {
            for &neighbor in neighbors {
                if targets.len() == portal_degree {
                    break;
                }
                if block_of[neighbor as usize] != home && !targets.contains(&neighbor) {
                    targets.push(neighbor);
                }
            }
        }

        // Top up with random out-of-block nodes; bounded attempts so a
        // single-block layout terminates with fewer portals.
        let mut attempts = 0;
        while targets.len() < portal_degree && attempts < 8 * portal_degree.max(1) {
            attempts += 1;
            let candidate = rng.gen_range(0..n) as VectorId;
            if block_of[candidate as usize] != home && !targets.contains(&candidate) {
                targets.push(candidate);
            }
        }
        portals.push(targets);
    }
    portals
}

fn build_micro_index(index: &HnswIndex, members: &[Vec<VectorId>]) -> Vec<Vec<Cluster>> {
    let dim = index.dimension();
    members
        .iter()
        .map(|block_members| {
            block_members
                .chunks(CLUSTER_SIZE)
                .map(|chunk| {
                    let mut centroid = vec![0.0f32; dim];
                    for &id in chunk {
                        let v = index.vector(id).expect("member id is in range");
                        for (c, x) in centroid.iter_mut().zip(v) {
                            *c += x;
                        }
                    }
                    let inv = 1.0 / chunk.len() as f32;
                    for c in &mut centroid {
                        *c *= inv;
                    }
                    Cluster {
                        centroid,
                        members: chunk.to_vec(),
                    }
                })
                .collect()
        })
        .collect()
}
