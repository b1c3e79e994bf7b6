//! Engine facade composing backends, index, and simulator per mode

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use tiervec_common::config::Config;
use tiervec_common::error::{Error, Result};
use tiervec_common::metrics::{self, LatencyTimer};
use tiervec_common::types::{AnnSsdMode, BackingKind, EngineMode, SearchResult, VectorId};

use tiervec_index::{HnswIndex, TieredHnswIndex};
use tiervec_sim::AnnSsdSimulator;
use tiervec_storage::tiered::CacheTierStats;
use tiervec_storage::{
    FileBackend, IoStatsSnapshot, MemoryBackend, StorageBackend, TieredBackend,
};

/// One built dataset in its mode-specific composition
enum Dataset {
    Dram(HnswIndex),
    Tiered {
        index: TieredHnswIndex,
        tier: Arc<TieredBackend>,
    },
    AnnSsd {
        sim: AnnSsdSimulator,
        tier: Arc<TieredBackend>,
        /// Controller state-machine wall-clock accumulated across queries,
        /// nanoseconds; produced by both traversal modes
        controller_time_ns: AtomicU64,
    },
}

impl Dataset {
    /// Record one query's modeled controller time
    fn add_controller_time(&self, us: f64) {
        if let Dataset::AnnSsd {
            controller_time_ns, ..
        } = self
        {
            controller_time_ns.fetch_add((us * 1e3) as u64, Ordering::Relaxed);
        }
    }
}

/// Throughput summary for one query batch
#[derive(Debug, Clone, Copy)]
pub struct BatchReport {
    pub queries: usize,
    /// Host wall-clock for the whole batch, microseconds
    pub wall_us: f64,
    /// SSD-model device-service time accumulated during the batch
    pub device_us: f64,
    /// Controller state-machine wall-clock accumulated during the batch
    /// (ann_ssd datasets; both traversal modes produce it)
    pub controller_us: f64,
}

impl BatchReport {
    /// Queries per second including modeled device-service time.
    ///
    /// `device_us` and `controller_us` price the same traversal two ways, so
    /// the larger of the two is charged rather than their sum.
    pub fn effective_qps(&self) -> f64 {
        let total_us = self.wall_us + self.device_us.max(self.controller_us);
        if total_us <= 0.0 {
            0.0
        } else {
            self.queries as f64 * 1e6 / total_us
        }
    }
}

/// Vector search engine: builds datasets per the configured mode and serves
/// k-NN queries against them.
pub struct Engine {
    config: Config,
    datasets: DashMap<String, Arc<Dataset>>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        info!(mode = ?config.mode, "engine initialized");
        Ok(Self {
            config,
            datasets: DashMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build a dataset from `vectors` under the configured mode.
    ///
    /// Ids are assigned densely in insertion order.
    pub fn build(&self, name: &str, dimension: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if self.datasets.contains_key(name) {
            return Err(Error::InvalidParameter(format!(
                "dataset {} already exists",
                name
            )));
        }

        let timer = LatencyTimer::start();
        let dataset = match self.config.mode {
            EngineMode::Dram => {
                let mut index = HnswIndex::new(dimension, self.config.index.clone())?;
                for vector in vectors {
                    index.insert(vector)?;
                }
                Dataset::Dram(index)
            }
            EngineMode::Tiered => {
                let tier = self.open_tier(name, dimension)?;
                let mut index = TieredHnswIndex::new(
                    dimension,
                    self.config.index.clone(),
                    tier.clone() as Arc<dyn StorageBackend>,
                )?;
                for vector in vectors {
                    index.insert(vector)?;
                }
                Dataset::Tiered { index, tier }
            }
            EngineMode::AnnSsd => {
                // Host-side build; the packed image then lives on the device.
                let mut index = HnswIndex::new(dimension, self.config.index.clone())?;
                for vector in vectors {
                    index.insert(vector)?;
                }
                let sim = AnnSsdSimulator::new(
                    &index,
                    self.config.ann_ssd.clone(),
                    self.config.index.seed,
                )?;
                let tier = self.open_tier(name, dimension)?;
                Dataset::AnnSsd {
                    sim,
                    tier,
                    controller_time_ns: AtomicU64::new(0),
                }
            }
        };

        info!(
            dataset = name,
            vectors = vectors.len(),
            dimension,
            elapsed_us = timer.elapsed_us(),
            "dataset built"
        );
        self.datasets.insert(name.to_string(), Arc::new(dataset));
        Ok(())
    }

    /// k-NN search with the configured `ef_search`
    pub fn search(&self, name: &str, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let dataset = self.dataset(name)?;
        let timer = LatencyTimer::start();
        let ef = self.config.index.ef_search.max(k);

        let results = match dataset.as_ref() {
            Dataset::Dram(index) => index.search(query, k, ef)?,
            Dataset::Tiered { index, .. } => index.search(query, k, ef)?,
            Dataset::AnnSsd { sim, tier, .. } => {
                let search = sim.search(query, k, Some(tier))?;
                dataset.add_controller_time(search.device_time_us);
                search.results
            }
        };

        let mode = mode_label(self.config.mode);
        metrics::record_query(mode);
        metrics::record_query_latency(mode, timer.elapsed_us());
        Ok(results)
    }

    /// Search a whole batch, fanning queries out across host threads.
    ///
    /// Parallelism happens only at this outer level; a single query never
    /// runs concurrently with itself.
    pub fn batch_search(
        &self,
        name: &str,
        queries: &[Vec<f32>],
        k: usize,
    ) -> Result<(Vec<Vec<SearchResult>>, BatchReport)> {
        let dataset = self.dataset(name)?;
        let device_before = self.ssd_model_time_us(name);
        let controller_before = self.controller_time_us(name);
        let timer = LatencyTimer::start();
        let ef = self.config.index.ef_search.max(k);

        let workers = num_cpus::get().max(1).min(queries.len().max(1));
        let chunk_size = queries.len().div_ceil(workers);
        let mut results: Vec<Vec<SearchResult>> = Vec::with_capacity(queries.len());

        std::thread::scope(|scope| -> Result<()> {
            let mut handles = Vec::with_capacity(workers);
            for chunk in queries.chunks(chunk_size.max(1)) {
                let dataset = &dataset;
                handles.push(scope.spawn(move || -> Result<Vec<Vec<SearchResult>>> {
                    chunk
                        .iter()
                        .map(|query| match dataset.as_ref() {
                            Dataset::Dram(index) => index.search(query, k, ef),
                            Dataset::Tiered { index, .. } => index.search(query, k, ef),
                            Dataset::AnnSsd { sim, tier, .. } => {
                                sim.search(query, k, Some(tier)).map(|search| {
                                    dataset.add_controller_time(search.device_time_us);
                                    search.results
                                })
                            }
                        })
                        .collect()
                }));
            }
            for handle in handles {
                let chunk_results = handle
                    .join()
                    .map_err(|_| Error::Internal("batch worker panicked".into()))??;
                results.extend(chunk_results);
            }
            Ok(())
        })?;

        let report = BatchReport {
            queries: queries.len(),
            wall_us: timer.elapsed_us(),
            device_us: self.ssd_model_time_us(name) - device_before,
            controller_us: self.controller_time_us(name) - controller_before,
        };
        metrics::record_device_time(report.device_us.max(report.controller_us));
        Ok((results, report))
    }

    /// Persist a dataset's index topology
    pub fn save_index(&self, name: &str, path: &Path) -> Result<()> {
        match self.dataset(name)?.as_ref() {
            Dataset::Dram(index) => index.save(path),
            Dataset::Tiered { index, .. } => index.save(path),
            Dataset::AnnSsd { .. } => Err(Error::InvalidParameter(
                "ann_ssd datasets persist through their source index".into(),
            )),
        }
    }

    /// Backing-store counters for a dataset, when its mode has a backing store
    pub fn io_stats(&self, name: &str) -> Result<Option<IoStatsSnapshot>> {
        Ok(match self.dataset(name)?.as_ref() {
            Dataset::Dram(_) => None,
            Dataset::Tiered { tier, .. } | Dataset::AnnSsd { tier, .. } => {
                Some(tier.stats())
            }
        })
    }

    /// Cache hit/miss counters for tiered datasets
    pub fn cache_stats(&self, name: &str) -> Result<Option<CacheTierStats>> {
        Ok(match self.dataset(name)?.as_ref() {
            Dataset::Dram(_) => None,
            Dataset::Tiered { tier, .. } | Dataset::AnnSsd { tier, .. } => {
                Some(tier.cache_stats())
            }
        })
    }

    /// Modeled device time for a dataset; 0 without a device model.
    ///
    /// Tiered datasets report the SSD model's accumulator. For `ann_ssd`
    /// datasets the figure follows the traversal mode: cheated reports the
    /// SSD model fed by its logical block reads, faithful reports the
    /// controller state machine's own wall-clock. Both raw figures stay
    /// available through [`Engine::ssd_model_time_us`] and
    /// [`Engine::controller_time_us`].
    pub fn device_time_us(&self, name: &str) -> f64 {
        self.datasets.get(name).map_or(0.0, |d| match d.as_ref() {
            Dataset::Dram(_) => 0.0,
            Dataset::Tiered { tier, .. } => tier.device_time_us(),
            Dataset::AnnSsd {
                tier,
                controller_time_ns,
                ..
            } => match self.config.ann_ssd.mode {
                AnnSsdMode::Cheated => tier.device_time_us(),
                AnnSsdMode::Faithful => controller_time_ns.load(Ordering::Relaxed) as f64 / 1e3,
            },
        })
    }

    /// SSD-model accumulator for a dataset; 0 when the model is disabled or
    /// nothing fed it
    pub fn ssd_model_time_us(&self, name: &str) -> f64 {
        self.datasets.get(name).map_or(0.0, |d| match d.as_ref() {
            Dataset::Dram(_) => 0.0,
            Dataset::Tiered { tier, .. } | Dataset::AnnSsd { tier, .. } => tier.device_time_us(),
        })
    }

    /// Controller state-machine wall-clock accumulated by an `ann_ssd`
    /// dataset; 0 for the other modes
    pub fn controller_time_us(&self, name: &str) -> f64 {
        self.datasets.get(name).map_or(0.0, |d| match d.as_ref() {
            Dataset::AnnSsd {
                controller_time_ns, ..
            } => controller_time_ns.load(Ordering::Relaxed) as f64 / 1e3,
            _ => 0.0,
        })
    }

    pub fn dataset_len(&self, name: &str) -> Result<usize> {
        Ok(match self.dataset(name)?.as_ref() {
            Dataset::Dram(index) => index.len(),
            Dataset::Tiered { index, .. } => index.len(),
            Dataset::AnnSsd { sim, .. } => sim.num_vectors(),
        })
    }

    pub fn drop_dataset(&self, name: &str) -> bool {
        self.datasets.remove(name).is_some()
    }

    fn dataset(&self, name: &str) -> Result<Arc<Dataset>> {
        self.datasets
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::InvalidParameter(format!("unknown dataset {}", name)))
    }

    /// Compose the cache tier over the configured backing store
    fn open_tier(&self, name: &str, dimension: usize) -> Result<Arc<TieredBackend>> {
        let backing: Arc<dyn StorageBackend> = match self.config.storage.backing {
            BackingKind::Memory => Arc::new(MemoryBackend::with_dimension(dimension)),
            BackingKind::File => {
                let dir = PathBuf::from(&self.config.storage.path);
                std::fs::create_dir_all(&dir)?;
                Arc::new(FileBackend::open(
                    dir.join(format!("{}.vec", name)),
                    dimension,
                )?)
            }
        };
        Ok(Arc::new(TieredBackend::new(
            backing,
            &self.config.cache,
            &self.config.ssd,
        )?))
    }
}

fn mode_label(mode: EngineMode) -> &'static str {
    match mode {
        EngineMode::Dram => "dram",
        EngineMode::Tiered => "tiered",
        EngineMode::AnnSsd => "ann_ssd",
    }
}

/// Convenience: ids of a result list, in rank order
pub fn result_ids(results: &[SearchResult]) -> Vec<VectorId> {
    results.iter().map(|r| r.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiervec_common::types::{CachePolicyKind, DistanceMetric};

    fn line_data(n: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![i as f32, 0.0]).collect()
    }

    fn base_config(mode: EngineMode) -> Config {
        let mut config = Config::default();
        config.mode = mode;
        config.index.m = 4;
        config.index.ef_construction = 50;
        config.index.ef_search = 16;
        config.index.metric = DistanceMetric::L2;
        config.index.seed = 7;
        config.cache.capacity = 8;
        config.cache.policy = CachePolicyKind::Lru;
        config
    }

    #[test]
    fn test_dram_mode_end_to_end() {
        let engine = Engine::new(base_config(EngineMode::Dram)).unwrap();
        engine.build("line", 2, &line_data(10)).unwrap();

        for i in 0..10u64 {
            let hits = engine.search("line", &[i as f32, 0.0], 1).unwrap();
            assert_eq!(hits[0].id, i);
        }
        assert!(engine.io_stats("line").unwrap().is_none());
    }

    #[test]
    fn test_tiered_mode_counts_io() {
        let engine = Engine::new(base_config(EngineMode::Tiered)).unwrap();
        engine.build("line", 2, &line_data(16)).unwrap();

        engine.search("line", &[5.0, 0.0], 2).unwrap();
        let stats = engine.cache_stats("line").unwrap().unwrap();
        assert!(stats.hits + stats.misses > 0);
    }

    #[test]
    fn test_ann_ssd_cheated_mode_reports_both_figures() {
        let mut config = base_config(EngineMode::AnnSsd);
        config.ann_ssd.vectors_per_block = 4;
        config.ann_ssd.max_steps = 0;
        config.ssd.enabled = true;

        let engine = Engine::new(config).unwrap();
        engine.build("line", 2, &line_data(16)).unwrap();

        let hits = engine.search("line", &[3.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].id, 3);
        // Cheated mode: the SSD model is the reference figure, and the
        // controller wall-clock is reported alongside it.
        assert!(engine.device_time_us("line") > 0.0);
        assert!(engine.ssd_model_time_us("line") > 0.0);
        assert!(engine.controller_time_us("line") > 0.0);
    }

    #[test]
    fn test_ann_ssd_faithful_mode_reports_controller_time() {
        let mut config = base_config(EngineMode::AnnSsd);
        config.ann_ssd.mode = AnnSsdMode::Faithful;
        config.ann_ssd.vectors_per_block = 4;
        config.ann_ssd.max_steps = 0;

        let engine = Engine::new(config).unwrap();
        engine.build("line", 2, &line_data(16)).unwrap();

        let hits = engine.search("line", &[3.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].id, 3);
        // Faithful mode never feeds the SSD model, but its state-machine
        // wall-clock must still surface.
        assert_eq!(engine.ssd_model_time_us("line"), 0.0);
        assert!(engine.controller_time_us("line") > 0.0);
        assert!(engine.device_time_us("line") > 0.0);

        let queries: Vec<Vec<f32>> = (0..8).map(|i| vec![i as f32, 0.0]).collect();
        let (_, report) = engine.batch_search("line", &queries, 1).unwrap();
        assert!(report.controller_us > 0.0);
        assert!(report.effective_qps() > 0.0);
    }

    #[test]
    fn test_batch_search_preserves_order() {
        let engine = Engine::new(base_config(EngineMode::Dram)).unwrap();
        engine.build("line", 2, &line_data(32)).unwrap();

        let queries: Vec<Vec<f32>> = (0..32).map(|i| vec![i as f32, 0.0]).collect();
        let (results, report) = engine.batch_search("line", &queries, 1).unwrap();

        assert_eq!(results.len(), 32);
        for (i, hits) in results.iter().enumerate() {
            assert_eq!(hits[0].id, i as u64);
        }
        assert_eq!(report.queries, 32);
        assert!(report.effective_qps() > 0.0);
    }

    #[test]
    fn test_duplicate_dataset_rejected() {
        let engine = Engine::new(base_config(EngineMode::Dram)).unwrap();
        engine.build("line", 2, &line_data(4)).unwrap();
        assert!(engine.build("line", 2, &line_data(4)).is_err());
        assert!(engine.drop_dataset("line"));
        assert!(engine.build("line", 2, &line_data(4)).is_ok());
    }

    #[test]
    fn test_unknown_dataset_is_an_error() {
        let engine = Engine::new(base_config(EngineMode::Dram)).unwrap();
        assert!(engine.search("ghost", &[0.0, 0.0], 1).is_err());
    }
}
