//! Deterministic random numbers for probability triggers.
//!
//! SplitMix64: eight bytes of state, so a solver's generator is snapshotted
//! and restored along with the rest of its state when a step is rolled back.
//! Each solver draws from its own stream, forked from the model seed, so
//! adding a sub-population never changes the draws another one sees.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed128;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// SplitMix64 generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Independent generator for stream `stream`, derived from this one's
    /// current state without advancing it.
    pub fn fork(&self, stream: u64) -> Self {
        let mut mixer = SimRng::new(self.state ^ stream.wrapping_mul(GOLDEN_GAMMA).rotate_left(17));
        SimRng::new(mixer.next_u64())
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// `true` with probability `p`. Values at or below zero never hit; values
    /// at or above one always do.
    pub fn chance(&mut self, p: Fixed128) -> bool {
        if p <= Fixed128::ZERO {
            return false;
        }
        if p >= Fixed128::from_num(1) {
            return true;
        }
        // For p in (0, 1) the Q64.64 bits are the fraction scaled to 2^64.
        let draw = self.next_u64();
        draw < p.to_bits() as u64
    }

    pub fn state(&self) -> u64 {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SimRng::new(7);
        let mut b = SimRng::new(7);
        for _ in 0..64 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn forks_are_stable_and_distinct() {
        let root = SimRng::new(42);
        assert_eq!(root.fork(1), root.fork(1));
        assert_ne!(root.fork(1).next_u64(), root.fork(2).next_u64());
        assert_eq!(root.state(), 42);
    }

    #[test]
    fn chance_bounds() {
        let mut rng = SimRng::new(3);
        for _ in 0..50 {
            assert!(!rng.chance(Fixed128::ZERO));
            assert!(rng.chance(Fixed128::from_num(1)));
            assert!(!rng.chance(Fixed128::from_num(-2)));
        }
    }

    #[test]
    fn chance_quarter_is_roughly_a_quarter() {
        let mut rng = SimRng::new(2024);
        let p = Fixed128::from_num(0.25);
        let hits = (0..8_000).filter(|_| rng.chance(p)).count();
        assert!((1_600..=2_400).contains(&hits), "got {hits}");
    }
}
