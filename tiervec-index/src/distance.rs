//! SIMD-accelerated distance kernels
//!
//! Every kernel has an AVX2 path processing 8 lanes per iteration and a
//! portable scalar fallback. The scalar path is the reference; the SIMD path
//! must agree with it within float rounding.

use tiervec_common::types::DistanceMetric;

/// Guard against zero-norm vectors under cosine
const COSINE_EPS: f32 = 1e-8;

// ============================================================================
// Public kernels
// ============================================================================

/// Sum of squared differences (no square root)
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") {
            return unsafe { l2_squared_avx2(a, b) };
        }
    }
    scalar::l2_squared(a, b)
}

/// Dot product `Σ aᵢ·bᵢ`
#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") {
            return unsafe { inner_product_avx2(a, b) };
        }
    }
    scalar::inner_product(a, b)
}

/// Cosine similarity `Σ aᵢ·bᵢ / (‖a‖·‖b‖ + ε)`.
///
/// The ε term makes zero-norm inputs score 0 instead of NaN.
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") {
            return unsafe { cosine_avx2(a, b) };
        }
    }
    scalar::cosine(a, b)
}

/// Comparator dispatch: every metric becomes "smaller is nearer"
pub trait Distance {
    fn distance(&self, a: &[f32], b: &[f32]) -> f32;
}

impl Distance for DistanceMetric {
    #[inline]
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::L2 => l2_squared(a, b),
            DistanceMetric::InnerProduct => -inner_product(a, b),
            DistanceMetric::Cosine => -cosine(a, b),
        }
    }
}

// ============================================================================
// Scalar reference
// ============================================================================

/// Portable reference kernels
pub mod scalar {
    use super::COSINE_EPS;

    #[inline]
    pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let diff = x - y;
                diff * diff
            })
            .sum()
    }

    #[inline]
    pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    #[inline]
    pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot = inner_product(a, b);
        let norm_a = inner_product(a, a).sqrt();
        let norm_b = inner_product(b, b).sqrt();
        dot / (norm_a * norm_b + COSINE_EPS)
    }
}

// ============================================================================
// AVX2 (8 floats per iteration)
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn l2_squared_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let len = a.len();
    let chunks = len / 8;
    let mut sum = _mm256_setzero_ps();

    for i in 0..chunks {
        let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
        let diff = _mm256_sub_ps(va, vb);
        sum = _mm256_fmadd_ps(diff, diff, sum);
    }

    let mut result = horizontal_sum(sum);
    for i in (chunks * 8)..len {
        let diff = a[i] - b[i];
        result += diff * diff;
    }
    result
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn inner_product_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let len = a.len();
    let chunks = len / 8;
    let mut sum = _mm256_setzero_ps();

    for i in 0..chunks {
        let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
        sum = _mm256_fmadd_ps(va, vb, sum);
    }

    let mut result = horizontal_sum(sum);
    for i in (chunks * 8)..len {
        result += a[i] * b[i];
    }
    result
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn cosine_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let len = a.len();
    let chunks = len / 8;
    let mut dot = _mm256_setzero_ps();
    let mut norm_a = _mm256_setzero_ps();
    let mut norm_b = _mm256_setzero_ps();

    for i in 0..chunks {
        let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
        let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
        dot = _mm256_fmadd_ps(va, vb, dot);
        norm_a = _mm256_fmadd_ps(va, va, norm_a);
        norm_b = _mm256_fmadd_ps(vb, vb, norm_b);
    }

    let mut dot_s = horizontal_sum(dot);
    let mut norm_a_s = horizontal_sum(norm_a);
    let mut norm_b_s = horizontal_sum(norm_b);
    for i in (chunks * 8)..len {
        dot_s += a[i] * b[i];
        norm_a_s += a[i] * a[i];
        norm_b_s += b[i] * b[i];
    }

    dot_s / (norm_a_s.sqrt() * norm_b_s.sqrt() + COSINE_EPS)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn horizontal_sum(v: std::arch::x86_64::__m256) -> f32 {
    use std::arch::x86_64::*;

    let sum128 = _mm_add_ps(_mm256_extractf128_ps(v, 0), _mm256_extractf128_ps(v, 1));
    let sum64 = _mm_add_ps(sum128, _mm_movehl_ps(sum128, sum128));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 1));
    _mm_cvtss_f32(sum32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_l2_squared_known_values() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![2.0, 3.0, 4.0, 5.0];
        assert!((l2_squared(&a, &a)).abs() < 1e-6);
        assert!((l2_squared(&a, &b) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_inner_product_known_values() {
        let a = vec![1.0, 0.0, 2.0];
        let b = vec![3.0, 5.0, 0.5];
        assert!((inner_product(&a, &b) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_parallel_and_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![2.0, 0.0];
        let c = vec![0.0, 3.0];
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-5);
        assert!(cosine(&a, &c).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_norm_is_zero_not_nan() {
        let zero = vec![0.0; 8];
        let v = vec![1.0; 8];
        let score = cosine(&zero, &v);
        assert!(!score.is_nan());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_simd_matches_scalar_on_long_vectors() {
        // 131 forces chunks plus a remainder tail.
        let a: Vec<f32> = (0..131).map(|i| (i as f32 * 0.37).sin()).collect();
        let b: Vec<f32> = (0..131).map(|i| (i as f32 * 0.71).cos()).collect();

        assert!((l2_squared(&a, &b) - scalar::l2_squared(&a, &b)).abs() < 1e-3);
        assert!((inner_product(&a, &b) - scalar::inner_product(&a, &b)).abs() < 1e-3);
        assert!((cosine(&a, &b) - scalar::cosine(&a, &b)).abs() < 1e-5);
    }

    #[rstest]
    #[case(DistanceMetric::L2)]
    #[case(DistanceMetric::InnerProduct)]
    #[case(DistanceMetric::Cosine)]
    fn test_nearer_is_smaller(#[case] metric: DistanceMetric) {
        let query = vec![1.0, 0.5, 0.0, -0.5];
        let near = vec![1.0, 0.5, 0.1, -0.5];
        let far = vec![-1.0, -0.5, 0.0, 0.5];
        assert!(metric.distance(&query, &near) < metric.distance(&query, &far));
    }
}
