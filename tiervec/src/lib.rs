//! TierVec - Tiered vector similarity-search engine
//!
//! Answers approximate k-NN queries over dense float vectors under three
//! operating modes:
//! - `dram`: payloads resident in host memory
//! - `tiered`: a DRAM cache fronting a backing store, with an optional
//!   analytic SSD device model accounting the misses
//! - `ann_ssd`: simulated graph traversal on the storage device itself
//!
//! The engine facade in this crate composes the storage, index, and
//! simulator crates according to a [`Config`](tiervec_common::Config).

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod engine;

pub use engine::{result_ids, BatchReport, Engine};

pub use tiervec_common::{config, error, types, Config, Error, Result};
pub use tiervec_index::{HnswIndex, TieredHnswIndex};
pub use tiervec_sim::AnnSsdSimulator;
pub use tiervec_storage::{
    FileBackend, MemoryBackend, SsdSimulator, StorageBackend, TieredBackend,
};
