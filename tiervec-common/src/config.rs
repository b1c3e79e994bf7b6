//! Configuration management for TierVec

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{
    AnnSsdMode, BackingKind, CachePolicyKind, CodeType, DistanceMetric, EngineMode,
    HardwareLevel, PlacementMode,
};

/// Main configuration structure for TierVec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Operating mode
    #[serde(default)]
    pub mode: EngineMode,

    /// Index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Backing storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Tiered cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// SSD device model configuration
    #[serde(default)]
    pub ssd: SsdConfig,

    /// ANN-in-SSD simulator configuration
    #[serde(default)]
    pub ann_ssd: AnnSsdConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: EngineMode::Dram,
            index: IndexConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            ssd: SsdConfig::default(),
            ann_ssd: AnnSsdConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML or JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = if path.as_ref().extension().map_or(false, |ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject parameter combinations the engine cannot run
    pub fn validate(&self) -> Result<()> {
        self.index.validate()?;

        if self.mode == EngineMode::Tiered && self.cache.capacity == 0 {
            return Err(Error::InvalidParameter(
                "cache_capacity must be >= 1 in tiered mode".into(),
            ));
        }
        if self.ann_ssd.vectors_per_block == 0 {
            return Err(Error::InvalidParameter(
                "vectors_per_block must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// HNSW index parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Target degree per node per layer (M)
    pub m: usize,
    /// Candidate budget during construction
    pub ef_construction: usize,
    /// Candidate budget during search
    pub ef_search: usize,
    /// Distance metric
    pub metric: DistanceMetric,
    /// RNG seed for level assignment
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            metric: DistanceMetric::L2,
            seed: 42,
        }
    }
}

impl IndexConfig {
    /// Layer-0 degree cap (2·M)
    pub fn m_max0(&self) -> usize {
        self.m * 2
    }

    /// Level multiplier `1/ln(M)`
    pub fn level_mult(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(Error::InvalidParameter("M must be >= 2".into()));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(Error::InvalidParameter(
                "ef_construction and ef_search must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Backing storage parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store behind the cache tier
    pub backing: BackingKind,
    /// Directory for flat vector files and topology files
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backing: BackingKind::Memory,
            path: "./tiervec-data".to_string(),
        }
    }
}

/// Tiered DRAM cache parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Capacity in vectors
    pub capacity: usize,
    /// Eviction policy
    pub policy: CachePolicyKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            policy: CachePolicyKind::Lru,
        }
    }
}

/// Analytic SSD device model parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsdConfig {
    /// Enable the device model on the tiered read path
    pub enabled: bool,
    /// Independent flash channels
    pub channels: u32,
    /// Queue depth per channel
    pub queue_depth: u32,
    /// Fixed per-read latency in microseconds
    pub base_latency_us: f64,
    /// Internal bandwidth in GB/s
    pub bandwidth_gbps: f64,
}

impl Default for SsdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channels: 8,
            queue_depth: 32,
            base_latency_us: 80.0,
            bandwidth_gbps: 3.2,
        }
    }
}

/// ANN-in-SSD simulator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnSsdConfig {
    /// Traversal accounting mode
    pub mode: AnnSsdMode,
    /// Controller capability level
    pub hw_level: HardwareLevel,
    /// Vectors per block (Kpb)
    pub vectors_per_block: usize,
    /// Out-of-block portal edges per node (P)
    pub portal_degree: usize,
    /// Block-visit budget; 0 visits every block
    pub max_steps: usize,
    /// Block layout strategy
    pub placement: PlacementMode,
    /// Intra-block acceleration
    pub code_type: CodeType,
}

impl Default for AnnSsdConfig {
    fn default() -> Self {
        Self {
            mode: AnnSsdMode::Cheated,
            hw_level: HardwareLevel::L1,
            vectors_per_block: 256,
            portal_degree: 4,
            max_steps: 64,
            placement: PlacementMode::Sequential,
            code_type: CodeType::None,
        }
    }
}
