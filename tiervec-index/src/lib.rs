//! TierVec Index
//!
//! Hierarchical proximity-graph (HNSW) indexing:
//! - SIMD distance kernels with scalar fallbacks
//! - In-memory index: build, k-NN search, persistence
//! - Tiered index: identical graph algorithms with payload reads routed
//!   through a storage backend
//! - Recall/precision metrics against exhaustive ground truth

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod distance;
pub mod hnsw;
pub mod persistence;
pub mod recall;
pub mod tiered;

pub use distance::Distance;
pub use hnsw::HnswIndex;
pub use recall::{brute_force_knn, mean_recall_at_k, precision_at_k, recall_at_k};
pub use tiered::TieredHnswIndex;
