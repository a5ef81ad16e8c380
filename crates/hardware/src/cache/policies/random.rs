//! Random Replacement Policy.
//!
//! This policy evicts a random eligible line from the set. It uses a xorshift
//! generator with a fixed seed so runs are reproducible.

use super::ReplacementPolicy;

/// Random Policy state.
#[derive(Debug)]
pub struct RandomPolicy {
    /// Number of ways in the cache.
    ways: usize,
    /// Internal state for the pseudo-random number generator.
    state: u64,
}

impl RandomPolicy {
    /// Creates a new Random policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets (unused in this policy but required by interface).
    /// * `ways` - The associativity (number of ways) of the cache.
    pub const fn new(_sets: usize, ways: usize) -> Self {
        Self {
            ways,
            state: 123_456_789,
        }
    }
}

impl ReplacementPolicy for RandomPolicy {
    fn on_access(&mut self, _set: usize, _way: usize) {}

    /// Draws a starting way and returns the first eligible way from there.
    fn choose_victim(&mut self, _set: usize, eligible: &[bool]) -> usize {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        super::first_eligible_from((x as usize) % self.ways, eligible)
    }
}
