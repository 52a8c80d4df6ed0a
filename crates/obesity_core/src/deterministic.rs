//! Deterministic utilities for reproducible splits and training
//!
//! Provides an LCG-based RNG, seed derivation, and the tie-breaking key
//! used by split search so identical inputs give identical models.

use std::num::Wrapping;

/// Linear Congruential Generator for deterministic pseudo-randomness
/// Uses constants from Numerical Recipes (glibc)
#[derive(Clone, Debug)]
pub struct LcgRng {
    state: Wrapping<u64>,
}

impl LcgRng {
    const MULTIPLIER: u64 = 1103515245;
    const INCREMENT: u64 = 12345;
    const MODULUS: u64 = 1 << 31;

    pub fn new(seed: u64) -> Self {
        Self {
            state: Wrapping(seed % Self::MODULUS),
        }
    }

    /// Generate next value in range [0, 2^31)
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state * Wrapping(Self::MULTIPLIER) + Wrapping(Self::INCREMENT);
        self.state.0 & (Self::MODULUS - 1)
    }

    /// Generate value in range [0, max)
    ///
    /// Scales by the high bits; the low bits of a power-of-two LCG cycle
    /// with short periods.
    pub fn next_range(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        ((self.next_u64() * max as u64) >> 31) as usize
    }

    /// Value in [0, 1_000_000) representing [0.0, 1.0) in micro units
    pub fn next_unit_micro(&mut self) -> u64 {
        (self.next_u64() * 1_000_000) / Self::MODULUS
    }

    /// Fisher-Yates shuffle in place
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_range(i + 1);
            items.swap(i, j);
        }
    }
}

/// Derive an independent sub-seed for a named stream.
///
/// Per-class shuffles and per-strategy subsampling each get their own
/// stream so adding a class or strategy never perturbs the others.
pub fn derive_seed(base: u64, stream: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&base.to_le_bytes());
    hasher.update(stream.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Deterministic tie-breaker for split selection
/// Orders equal-gain candidates by (feature_idx, threshold, node_id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SplitTieBreaker {
    pub feature_idx: usize,
    pub threshold: i64,
    pub node_id: usize,
}

impl SplitTieBreaker {
    pub fn new(feature_idx: usize, threshold: i64, node_id: usize) -> Self {
        Self {
            feature_idx,
            threshold,
            node_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcg_determinism() {
        let mut rng1 = LcgRng::new(42);
        let mut rng2 = LcgRng::new(42);

        for _ in 0..100 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_lcg_range() {
        let mut rng = LcgRng::new(42);
        for _ in 0..100 {
            assert!(rng.next_range(10) < 10);
            assert!(rng.next_unit_micro() < 1_000_000);
        }
        assert_eq!(rng.next_range(0), 0);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut items: Vec<u32> = (0..50).collect();
        LcgRng::new(7).shuffle(&mut items);
        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_ne!(items, sorted);

        let mut again: Vec<u32> = (0..50).collect();
        LcgRng::new(7).shuffle(&mut again);
        assert_eq!(items, again);
    }

    #[test]
    fn test_derived_seeds_are_independent() {
        assert_eq!(derive_seed(42, "Normal"), derive_seed(42, "Normal"));
        assert_ne!(derive_seed(42, "Normal"), derive_seed(42, "Obese"));
        assert_ne!(derive_seed(42, "Normal"), derive_seed(43, "Normal"));
    }

    #[test]
    fn test_tie_breaker_ordering() {
        let t1 = SplitTieBreaker::new(0, 100, 0);
        let t2 = SplitTieBreaker::new(0, 100, 1);
        let t3 = SplitTieBreaker::new(1, 50, 0);

        assert!(t1 < t2);
        assert!(t1 < t3);
    }
}
