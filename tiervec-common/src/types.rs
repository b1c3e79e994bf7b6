//! Common type definitions for TierVec

use serde::{Deserialize, Serialize};

/// Unique identifier for a vector in an index.
///
/// Ids are small densely-packed integers in `[0, N)` after construction.
pub type VectorId = u64;

// ============================================================================
// Distance Types
// ============================================================================

/// Distance metrics for vector similarity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance (no square root)
    L2,
    /// Inner product (negated so nearer is smaller)
    InnerProduct,
    /// Cosine similarity (negated so nearer is smaller)
    Cosine,
}

impl DistanceMetric {
    /// Wire tag used by the persistent index header
    pub fn as_u8(self) -> u8 {
        match self {
            DistanceMetric::L2 => 0,
            DistanceMetric::InnerProduct => 1,
            DistanceMetric::Cosine => 2,
        }
    }

    /// Inverse of [`DistanceMetric::as_u8`]
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DistanceMetric::L2),
            1 => Some(DistanceMetric::InnerProduct),
            2 => Some(DistanceMetric::Cosine),
            _ => None,
        }
    }
}

/// A single k-NN search hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Node id
    pub id: VectorId,
    /// Comparator distance (smaller is nearer for every metric)
    pub distance: f32,
}

// ============================================================================
// Operating Modes
// ============================================================================

/// Backend composition selected by the engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// All payloads resident in host memory
    Dram,
    /// DRAM cache fronting a backing store, optional SSD model
    Tiered,
    /// Graph traversal simulated on the storage device
    AnnSsd,
}

impl Default for EngineMode {
    fn default() -> Self {
        EngineMode::Dram
    }
}

/// Backing store behind the tiered cache
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackingKind {
    /// In-process slot array
    Memory,
    /// Flat binary file, positional I/O
    File,
}

/// Eviction policy for the tiered DRAM cache
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicyKind {
    /// Least-recently-used
    Lru,
    /// Least-frequently-used, least-recently-seen tie-break
    Lfu,
}

// ============================================================================
// ANN-in-SSD Types
// ============================================================================

/// How the in-storage traversal is accounted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnnSsdMode {
    /// Host-side scan of visited blocks, analytic device timing
    Cheated,
    /// Step-by-step controller state machine
    Faithful,
}

/// Block layout strategy for packed vectors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    /// Blocks filled in id order
    Sequential,
    /// Layer-0 graph neighbors co-located where possible
    LocalityAware,
}

/// Intra-block acceleration structure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CodeType {
    /// Score every vector in a visited block
    None,
    /// Per-block summary vectors pruning the full scan
    MicroIndex,
}

/// Controller capability profile for the in-storage simulator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum HardwareLevel {
    /// Slow controller, no SIMD
    L0,
    /// SIMD on the controller
    L1,
    /// SIMD plus multiple compute units
    L2,
    /// Full-parallel ideal controller
    L3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_tag_roundtrip() {
        for metric in [
            DistanceMetric::L2,
            DistanceMetric::InnerProduct,
            DistanceMetric::Cosine,
        ] {
            assert_eq!(DistanceMetric::from_u8(metric.as_u8()), Some(metric));
        }
        assert_eq!(DistanceMetric::from_u8(3), None);
    }

    #[test]
    fn test_hardware_levels_ordered() {
        assert!(HardwareLevel::L0 < HardwareLevel::L1);
        assert!(HardwareLevel::L2 < HardwareLevel::L3);
    }
}
