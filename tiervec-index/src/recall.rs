//! Retrieval quality metrics
//!
//! Ground truth comes from an exhaustive scan with the scalar kernels, so
//! the metrics are independent of the SIMD paths they grade.

use std::collections::{BinaryHeap, HashSet};

use tiervec_common::types::{DistanceMetric, SearchResult, VectorId};

use crate::distance::scalar;
use crate::hnsw::OrderedFloat;

/// Fraction of the true k-NN present in `retrieved`
pub fn recall_at_k(retrieved: &[VectorId], truth: &[VectorId]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let truth_set: HashSet<VectorId> = truth.iter().copied().collect();
    let found = retrieved.iter().filter(|id| truth_set.contains(id)).count();
    found as f64 / truth.len() as f64
}

/// Fraction of `retrieved` that belongs to the true k-NN
pub fn precision_at_k(retrieved: &[VectorId], truth: &[VectorId]) -> f64 {
    if retrieved.is_empty() {
        return 0.0;
    }
    let truth_set: HashSet<VectorId> = truth.iter().copied().collect();
    let found = retrieved.iter().filter(|id| truth_set.contains(id)).count();
    found as f64 / retrieved.len() as f64
}

/// Mean recall@k over paired result/truth lists
pub fn mean_recall_at_k(retrieved: &[Vec<VectorId>], truth: &[Vec<VectorId>]) -> f64 {
    assert_eq!(retrieved.len(), truth.len());
    if retrieved.is_empty() {
        return 0.0;
    }
    let sum: f64 = retrieved
        .iter()
        .zip(truth.iter())
        .map(|(r, t)| recall_at_k(r, t))
        .sum();
    sum / retrieved.len() as f64
}

/// Exact k-NN by exhaustive scan over a flat row-major arena.
///
/// Scalar kernels only; results sorted ascending by comparator distance.
pub fn brute_force_knn(
    vectors: &[f32],
    dimension: usize,
    query: &[f32],
    k: usize,
    metric: DistanceMetric,
) -> Vec<SearchResult> {
    assert!(dimension > 0);
    assert_eq!(query.len(), dimension);

    let n = vectors.len() / dimension;
    let mut heap: BinaryHeap<(OrderedFloat, VectorId)> = BinaryHeap::new();

    for id in 0..n {
        let row = &vectors[id * dimension..(id + 1) * dimension];
        let distance = match metric {
            DistanceMetric::L2 => scalar::l2_squared(query, row),
            DistanceMetric::InnerProduct => -scalar::inner_product(query, row),
            DistanceMetric::Cosine => -scalar::cosine(query, row),
        };
        // Max element leaves first; equal distances evict the larger id.
        heap.push((OrderedFloat(distance), id as VectorId));
        if heap.len() > k {
            heap.pop();
        }
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_counts_overlap() {
        assert!((recall_at_k(&[1, 2, 3], &[1, 2, 4]) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(recall_at_k(&[1, 2, 3], &[1, 2, 3]), 1.0);
        assert_eq!(recall_at_k(&[], &[1]), 0.0);
    }

    #[test]
    fn test_precision_uses_retrieved_size() {
        assert!((precision_at_k(&[1, 9], &[1, 2, 3]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_mean_recall_in_unit_interval() {
        let retrieved = vec![vec![1, 2], vec![5, 6], vec![9, 10]];
        let truth = vec![vec![1, 2], vec![6, 7], vec![0, 3]];
        let mean = mean_recall_at_k(&retrieved, &truth);
        assert!((0.0..=1.0).contains(&mean));
        assert!((mean - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_brute_force_orders_by_true_distance() {
        // Four points on a line; query sits at 2.1.
        let vectors = vec![0.0, 1.0, 2.0, 5.0];
        let hits = brute_force_knn(&vectors, 1, &[2.1], 3, DistanceMetric::L2);
        let ids: Vec<VectorId> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2, 1, 0]);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_brute_force_handles_k_larger_than_n() {
        let vectors = vec![0.0, 1.0];
        let hits = brute_force_knn(&vectors, 1, &[0.0], 10, DistanceMetric::L2);
        assert_eq!(hits.len(), 2);
    }
}
