//! Seeded randomness for fault schedules.
//!
//! Xoshiro256** seeded from a single `u64`; the same seed always yields the
//! same fault schedule, so a failing run can be replayed from its seed.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

/// Reproducible random source for simulated oracle faults.
///
/// ```rust
/// use glupe_dst::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
pub struct DeterministicRng {
    seed: u64,
    rng: Xoshiro256StarStar,
    draws_count: u64,
}

impl DeterministicRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Xoshiro256StarStar::seed_from_u64(seed),
            draws_count: 0,
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Values drawn since construction.
    #[must_use]
    pub fn draws_count(&self) -> u64 {
        self.draws_count
    }

    pub fn next_u64(&mut self) -> u64 {
        self.draws_count += 1;
        self.rng.gen()
    }

    /// `true` with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        debug_assert!((0.0..=1.0).contains(&p), "Probability must be in [0.0, 1.0]");
        self.draws_count += 1;
        self.rng.gen_bool(p)
    }

    /// Uniform whole seconds in `1..=secs_max`.
    pub fn secs_up_to(&mut self, secs_max: u64) -> u64 {
        debug_assert!(secs_max > 0);
        self.draws_count += 1;
        self.rng.gen_range(1..=secs_max)
    }

    /// Independent stream seeded from this one.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        let seed = self.next_u64();
        Self::new(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = DeterministicRng::new(42);
        let mut b = DeterministicRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        assert_eq!(a.draws_count(), 100);
    }

    #[test]
    fn test_secs_within_bounds() {
        let mut rng = DeterministicRng::new(7);
        for _ in 0..1000 {
            let v = rng.secs_up_to(5);
            assert!((1..=5).contains(&v));
        }
    }

    #[test]
    fn test_chance_extremes() {
        let mut rng = DeterministicRng::new(3);
        assert!(rng.chance(1.0));
        assert!(!rng.chance(0.0));
    }

    #[test]
    fn test_fork_is_deterministic() {
        let mut a = DeterministicRng::new(9);
        let mut b = DeterministicRng::new(9);
        assert_eq!(a.fork().next_u64(), b.fork().next_u64());
    }
}
