//! First-In, First-Out (FIFO) Replacement Policy.
//!
//! This policy evicts the oldest line in a set, regardless of how recently it was
//! accessed. It operates as a round-robin pointer per set.
//!
//! # Performance
//!
//! - **Time Complexity:**
//!   - `on_access()`: O(1)
//!   - `choose_victim()`: O(1), O(W) when the pointed way is not eligible
//! - **Space Complexity:** O(S) where S is the number of sets
//! - **Worst Case:** Workloads with strong temporal locality

use super::ReplacementPolicy;

/// FIFO Policy state.
#[derive(Debug)]
pub struct FifoPolicy {
    /// Tracks the next way to be evicted for each set.
    next_way: Vec<usize>,
    /// Number of ways in the cache.
    ways: usize,
}

impl FifoPolicy {
    /// Creates a new FIFO policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets in the cache.
    /// * `ways` - The associativity (number of ways) of the cache.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            next_way: vec![0; sets],
            ways,
        }
    }
}

impl ReplacementPolicy for FifoPolicy {
    /// Advances the pointer when the way it points at is (re)filled, keeping fill order.
    fn on_access(&mut self, set: usize, way: usize) {
        if self.next_way[set] == way {
            self.next_way[set] = (self.next_way[set] + 1) % self.ways;
        }
    }

    fn choose_victim(&mut self, set: usize, eligible: &[bool]) -> usize {
        super::first_eligible_from(self.next_way[set], eligible)
    }
}
