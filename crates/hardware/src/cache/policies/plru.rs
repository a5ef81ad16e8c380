//! Pseudo-LRU (PLRU) Replacement Policy.
//!
//! Approximates LRU with one recency bit per way. An access sets the way's bit; once
//! every bit in the set is set, all bits except the one just accessed are cleared.
//! The victim is the first way whose bit is clear.
//!
//! # Performance
//!
//! - **Time Complexity:**
//!   - `on_access()`: O(1)
//!   - `choose_victim()`: O(W)
//! - **Space Complexity:** O(S) words where S is sets (much less than LRU)
//! - **Worst Case:** Pathological cases can cause premature eviction of useful lines

use super::ReplacementPolicy;

/// PLRU Policy state.
#[derive(Debug)]
pub struct PlruPolicy {
    /// One recency bitmask per set.
    usage: Vec<u64>,
    /// Number of ways in the cache.
    ways: usize,
}

impl PlruPolicy {
    /// Creates a new PLRU policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets in the cache.
    /// * `ways` - The associativity (number of ways) of the cache, at most 64.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            usage: vec![0; sets],
            ways,
        }
    }

    const fn all_ones(&self) -> u64 {
        if self.ways >= 64 {
            u64::MAX
        } else {
            (1 << self.ways) - 1
        }
    }
}

impl ReplacementPolicy for PlruPolicy {
    fn on_access(&mut self, set: usize, way: usize) {
        let mask = 1 << way;
        self.usage[set] |= mask;
        let all_ones = self.all_ones();
        if (self.usage[set] & all_ones) == all_ones {
            self.usage[set] = mask;
        }
    }

    fn choose_victim(&mut self, set: usize, eligible: &[bool]) -> usize {
        let bits = self.usage[set];
        (0..self.ways)
            .find(|&way| eligible[way] && (bits >> way) & 1 == 0)
            .unwrap_or_else(|| super::first_eligible_from(0, eligible))
    }
}
