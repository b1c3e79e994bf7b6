//! Binary persistence for index topology
//!
//! Self-describing little-endian format, topology only; payloads stay in the
//! storage backend:
//!
//! ```text
//! [4B magic "HNSW"] [4B version=1]
//! [8B dimension] [8B M] [8B M_max0] [8B ef_construction] [8B num_vectors]
//! [4B max_level] [8B entry_point] [1B metric]
//! For each node v in 0..N:
//!   [4B level_v]
//!   For each layer 0..=level_v:
//!     [4B degree] [degree x 8B neighbor ids]
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use tiervec_common::config::IndexConfig;
use tiervec_common::error::{Error, Result};
use tiervec_common::types::{DistanceMetric, VectorId};

use tiervec_storage::StorageBackend;

use crate::hnsw::{GraphTopology, HnswIndex};
use crate::tiered::TieredHnswIndex;

const MAGIC: [u8; 4] = *b"HNSW";
const VERSION: u32 = 1;

// ============================================================================
// Header
// ============================================================================

pub(crate) struct TopologyHeader {
    pub dimension: u64,
    pub m: u64,
    pub m_max0: u64,
    pub ef_construction: u64,
    pub num_vectors: u64,
    pub max_level: u32,
    pub entry_point: u64,
    pub metric: DistanceMetric,
}

impl TopologyHeader {
    fn for_index(config: &IndexConfig, dimension: usize, graph: &GraphTopology) -> Self {
        Self {
            dimension: dimension as u64,
            m: config.m as u64,
            m_max0: config.m_max0() as u64,
            ef_construction: config.ef_construction as u64,
            num_vectors: graph.len() as u64,
            max_level: graph.max_level,
            entry_point: graph.entry_point.unwrap_or(0),
            metric: config.metric,
        }
    }

    /// Rebuild an [`IndexConfig`] from persisted fields.
    ///
    /// `ef_search` and `seed` are not part of the format; they fall back to
    /// defaults and only matter for future inserts.
    fn to_config(&self) -> IndexConfig {
        IndexConfig {
            m: self.m as usize,
            ef_construction: self.ef_construction as usize,
            metric: self.metric,
            ..IndexConfig::default()
        }
    }
}

// ============================================================================
// Wire helpers
// ============================================================================

fn write_u32<W: Write>(w: &mut W, value: u32) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_u64<W: Write>(w: &mut W, value: u64) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

// ============================================================================
// Topology serialization
// ============================================================================

pub(crate) fn write_topology<W: Write>(
    w: &mut W,
    header: &TopologyHeader,
    graph: &GraphTopology,
) -> Result<()> {
    w.write_all(&MAGIC)?;
    write_u32(w, VERSION)?;

    write_u64(w, header.dimension)?;
    write_u64(w, header.m)?;
    write_u64(w, header.m_max0)?;
    write_u64(w, header.ef_construction)?;
    write_u64(w, header.num_vectors)?;
    write_u32(w, header.max_level)?;
    write_u64(w, header.entry_point)?;
    w.write_all(&[header.metric.as_u8()])?;

    for (node, layers) in graph.neighbors.iter().enumerate() {
        write_u32(w, graph.levels[node])?;
        for list in layers {
            write_u32(w, list.len() as u32)?;
            for &neighbor in list {
                write_u64(w, neighbor)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn read_topology<R: Read>(r: &mut R) -> Result<(TopologyHeader, GraphTopology)> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|_| Error::CorruptFormat("truncated header".into()))?;
    if magic != MAGIC {
        return Err(Error::CorruptFormat(format!("bad magic {:?}", magic)));
    }
    let version = read_u32(r)?;
    if version != VERSION {
        return Err(Error::CorruptFormat(format!(
            "unsupported version {}",
            version
        )));
    }

    let dimension = read_u64(r)?;
    let m = read_u64(r)?;
    let m_max0 = read_u64(r)?;
    let ef_construction = read_u64(r)?;
    let num_vectors = read_u64(r)?;
    let max_level = read_u32(r)?;
    let entry_point = read_u64(r)?;
    let mut metric_tag = [0u8; 1];
    r.read_exact(&mut metric_tag)?;
    let metric = DistanceMetric::from_u8(metric_tag[0])
        .ok_or_else(|| Error::CorruptFormat(format!("unknown metric tag {}", metric_tag[0])))?;

    if dimension == 0 && num_vectors > 0 {
        return Err(Error::CorruptFormat("zero dimension".into()));
    }
    if m < 2 || m_max0 != m * 2 {
        return Err(Error::CorruptFormat(format!(
            "inconsistent degree caps M={} M_max0={}",
            m, m_max0
        )));
    }
    if num_vectors > 0 && entry_point >= num_vectors {
        return Err(Error::CorruptFormat(format!(
            "entry point {} out of range",
            entry_point
        )));
    }

    let mut graph = GraphTopology::new();
    graph.max_level = max_level;
    graph.entry_point = (num_vectors > 0).then_some(entry_point);

    for node in 0..num_vectors {
        let level = read_u32(r)?;
        if level > max_level {
            return Err(Error::CorruptFormat(format!(
                "node {} level {} exceeds max level {}",
                node, level, max_level
            )));
        }
        let mut layers = Vec::with_capacity(level as usize + 1);
        for _ in 0..=level {
            let degree = read_u32(r)?;
            let mut list = Vec::with_capacity(degree as usize);
            for _ in 0..degree {
                let neighbor = read_u64(r)?;
                if neighbor >= num_vectors || neighbor == node {
                    return Err(Error::CorruptFormat(format!(
                        "node {} has invalid neighbor {}",
                        node, neighbor
                    )));
                }
                list.push(neighbor as VectorId);
            }
            layers.push(list);
        }
        graph.levels.push(level);
        graph.neighbors.push(layers);
    }

    let header = TopologyHeader {
        dimension,
        m,
        m_max0,
        ef_construction,
        num_vectors,
        max_level,
        entry_point,
        metric,
    };
    Ok((header, graph))
}

// ============================================================================
// Index-level save/load
// ============================================================================

impl HnswIndex {
    /// Persist the topology to `path` (payloads are not written)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = BufWriter::new(File::create(path.as_ref())?);
        let header = TopologyHeader::for_index(self.config(), self.dimension(), self.graph());
        write_topology(&mut w, &header, self.graph())?;
        w.flush()?;
        info!(path = %path.as_ref().display(), nodes = self.len(), "index topology saved");
        Ok(())
    }

    /// Load a topology and pull every payload out of `payloads`.
    ///
    /// A corrupt file fails before anything is materialized, so the caller's
    /// index slot stays empty.
    pub fn load<P: AsRef<Path>>(path: P, payloads: &dyn StorageBackend) -> Result<Self> {
        let mut r = BufReader::new(File::open(path.as_ref())?);
        let (header, graph) = read_topology(&mut r)?;

        let dimension = header.dimension as usize;
        if payloads.dimension() != 0 && payloads.dimension() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: payloads.dimension(),
            });
        }

        let mut vectors = Vec::with_capacity(header.num_vectors as usize * dimension);
        for id in 0..header.num_vectors {
            let vector = payloads.read_node(id)?;
            if vector.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            vectors.extend_from_slice(&vector);
        }

        info!(path = %path.as_ref().display(), nodes = header.num_vectors, "index topology loaded");
        Ok(HnswIndex::from_parts(
            header.to_config(),
            dimension,
            graph,
            vectors,
        ))
    }
}

impl TieredHnswIndex {
    /// Persist the topology to `path` (payloads stay in the backend)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = BufWriter::new(File::create(path.as_ref())?);
        let header = TopologyHeader::for_index(self.config(), self.dimension(), self.graph());
        write_topology(&mut w, &header, self.graph())?;
        w.flush()?;
        info!(path = %path.as_ref().display(), nodes = self.len(), "tiered topology saved");
        Ok(())
    }

    /// Load a topology and serve payload reads from `backend`
    pub fn load<P: AsRef<Path>>(path: P, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let mut r = BufReader::new(File::open(path.as_ref())?);
        let (header, graph) = read_topology(&mut r)?;

        let dimension = header.dimension as usize;
        if backend.dimension() != 0 && backend.dimension() != dimension {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                actual: backend.dimension(),
            });
        }

        Ok(TieredHnswIndex::from_parts(
            header.to_config(),
            dimension,
            graph,
            backend,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write as _};
    use tempfile::TempDir;
    use tiervec_storage::MemoryBackend;

    fn build_index() -> HnswIndex {
        let config = IndexConfig {
            m: 4,
            ef_construction: 50,
            ef_search: 10,
            metric: DistanceMetric::L2,
            seed: 7,
        };
        let mut index = HnswIndex::new(2, config).unwrap();
        for i in 0..10 {
            index.insert(&[i as f32, 0.0]).unwrap();
        }
        index
    }

    #[test]
    fn test_save_load_roundtrip_searches_identically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("line.hnsw");

        let index = build_index();
        index.save(&path).unwrap();

        let payloads = MemoryBackend::new();
        crate::tiered::export_payloads(&index, &payloads).unwrap();
        let loaded = HnswIndex::load(&path, &payloads).unwrap();

        assert_eq!(loaded.len(), index.len());
        for i in 0..10u64 {
            let q = [i as f32, 0.0];
            assert_eq!(
                index.search(&q, 3, 10).unwrap(),
                loaded.search(&q, 3, 10).unwrap()
            );
        }
    }

    #[test]
    fn test_bad_magic_is_corrupt_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bogus.hnsw");
        std::fs::write(&path, b"NOPE00000000").unwrap();

        let payloads = MemoryBackend::new();
        let err = HnswIndex::load(&path, &payloads).unwrap_err();
        assert!(err.is_corruption(), "got {:?}", err);
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.hnsw");

        let index = build_index();
        index.save(&path).unwrap();

        // Chop the adjacency tables in half.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len / 2).unwrap();

        let payloads = MemoryBackend::new();
        assert!(HnswIndex::load(&path, &payloads).is_err());
    }

    #[test]
    fn test_tampered_entry_point_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tampered.hnsw");
        let index = build_index();
        index.save(&path).unwrap();

        // entry_point lives after magic(4) version(4) and five u64 fields
        // plus max_level(4) = 52 bytes in.
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(52)).unwrap();
        file.write_all(&u64::MAX.to_le_bytes()).unwrap();

        let payloads = MemoryBackend::new();
        let err = HnswIndex::load(&path, &payloads).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_tiered_load_reuses_backend_payloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiered.hnsw");

        let index = build_index();
        index.save(&path).unwrap();

        let backend = Arc::new(MemoryBackend::new());
        crate::tiered::export_payloads(&index, backend.as_ref()).unwrap();

        let loaded = TieredHnswIndex::load(&path, backend).unwrap();
        for i in 0..10u64 {
            let q = [i as f32, 0.0];
            assert_eq!(
                index.search(&q, 1, 10).unwrap(),
                loaded.search(&q, 1, 10).unwrap()
            );
        }
    }
}
