//! Least Recently Used (LRU) Replacement Policy.
//!
//! This policy evicts the line that has not been accessed for the longest time.
//! It maintains a usage stack for each set. When a line is accessed, it is moved
//! to the top (Most Recently Used position). The bottom of the stack represents
//! the Least Recently Used line.
//!
//! # Performance
//!
//! - **Time Complexity:**
//!   - `on_access()`: O(W) where W is the number of ways (associativity)
//!   - `choose_victim()`: O(W) in the worst case, when recent ways are not eligible
//! - **Space Complexity:** O(S × W) where S is the number of sets
//! - **Best Case:** Working sets with good temporal locality
//! - **Worst Case:** Scanning patterns larger than cache capacity (thrashing)

use super::ReplacementPolicy;

/// LRU Policy state.
#[derive(Debug)]
pub struct LruPolicy {
    /// A vector of usage stacks (one per set).
    /// Index 0 is MRU, last index is LRU.
    usage: Vec<Vec<usize>>,
}

impl LruPolicy {
    /// Creates a new LRU policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets in the cache.
    /// * `ways` - The associativity (number of ways) of the cache.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            usage: (0..sets).map(|_| (0..ways).collect()).collect(),
        }
    }
}

impl ReplacementPolicy for LruPolicy {
    /// Moves the accessed `way` to the MRU position of its set's stack.
    fn on_access(&mut self, set: usize, way: usize) {
        let stack = &mut self.usage[set];
        if let Some(pos) = stack.iter().position(|&x| x == way) {
            let _ = stack.remove(pos);
        }
        stack.insert(0, way);
    }

    /// Returns the least recently used eligible way.
    fn choose_victim(&mut self, set: usize, eligible: &[bool]) -> usize {
        self.usage[set]
            .iter()
            .rev()
            .copied()
            .find(|&way| eligible[way])
            .unwrap_or(0)
    }
}
