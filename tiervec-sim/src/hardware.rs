//! Controller capability profiles

use tiervec_common::types::HardwareLevel;

/// Fixed per-operation costs for one controller capability level
#[derive(Debug, Clone, Copy)]
pub struct CostProfile {
    /// Nanoseconds per scored vector element (one f32 lane of one distance)
    pub score_ns_per_element: f64,
    /// Fixed controller overhead per visited block, microseconds
    pub block_overhead_us: f64,
    /// Parallel compute units dividing the scoring work
    pub compute_units: u32,
}

impl CostProfile {
    /// Cost figures per capability level
    pub fn for_level(level: HardwareLevel) -> Self {
        match level {
            // Slow embedded core, no SIMD.
            HardwareLevel::L0 => Self {
                score_ns_per_element: 4.0,
                block_overhead_us: 25.0,
                compute_units: 1,
            },
            // SIMD on the controller.
            HardwareLevel::L1 => Self {
                score_ns_per_element: 0.5,
                block_overhead_us: 12.0,
                compute_units: 1,
            },
            // SIMD plus multiple compute units.
            HardwareLevel::L2 => Self {
                score_ns_per_element: 0.5,
                block_overhead_us: 8.0,
                compute_units: 4,
            },
            // Full-parallel ideal controller.
            HardwareLevel::L3 => Self {
                score_ns_per_element: 0.125,
                block_overhead_us: 2.0,
                compute_units: 16,
            },
        }
    }

    /// Microseconds to score `vectors` payloads of `dimension` elements
    pub fn score_time_us(&self, vectors: usize, dimension: usize) -> f64 {
        let elements = vectors as f64 * dimension as f64;
        elements * self.score_ns_per_element / self.compute_units as f64 / 1_000.0
    }

    /// Microseconds to visit one block scoring `vectors` payloads
    pub fn block_time_us(&self, vectors: usize, dimension: usize) -> f64 {
        self.block_overhead_us + self.score_time_us(vectors, dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_strictly_speed_up() {
        let block = |level| CostProfile::for_level(level).block_time_us(256, 128);
        assert!(block(HardwareLevel::L0) > block(HardwareLevel::L1));
        assert!(block(HardwareLevel::L1) > block(HardwareLevel::L2));
        assert!(block(HardwareLevel::L2) > block(HardwareLevel::L3));
    }

    #[test]
    fn test_score_time_scales_linearly() {
        let profile = CostProfile::for_level(HardwareLevel::L1);
        let one = profile.score_time_us(100, 64);
        let two = profile.score_time_us(200, 64);
        assert!((two - 2.0 * one).abs() < 1e-9);
    }
}
