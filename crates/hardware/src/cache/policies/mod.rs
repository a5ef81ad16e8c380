//! Cache Replacement Policies.
//!
//! Implements the algorithms that pick a victim way in a full set.
//!
//! # Policies
//!
//! - `Fifo`: First-In, First-Out.
//! - `Lru`: Least Recently Used.
//! - `Plru`: Pseudo-LRU (one recency bit per way).
//! - `Random`: Random selection.
//!
//! The set store only asks for a victim when every way is valid, and passes a mask of the
//! ways that may be evicted (lines with an upgrade in flight may not). Every policy must
//! return an eligible way whenever at least one exists.

use std::fmt;

use crate::config::ReplacementPolicy as PolicyType;

/// First-In, First-Out replacement policy.
pub mod fifo;

/// Least Recently Used replacement policy.
pub mod lru;

/// Pseudo-LRU replacement policy.
pub mod plru;

/// Random replacement policy.
pub mod random;

pub use fifo::FifoPolicy;
pub use lru::LruPolicy;
pub use plru::PlruPolicy;
pub use random::RandomPolicy;

/// Trait for cache replacement policies.
pub trait ReplacementPolicy: Send + Sync + fmt::Debug {
    /// Updates the policy state when a way is filled or accessed.
    ///
    /// # Arguments
    ///
    /// * `set` - The cache set index.
    /// * `way` - The way index within the set that was accessed.
    fn on_access(&mut self, set: usize, way: usize);

    /// Selects a victim way in a full set.
    ///
    /// # Arguments
    ///
    /// * `set` - The cache set index.
    /// * `eligible` - One flag per way; only flagged ways may be returned.
    ///
    /// # Returns
    ///
    /// The index of the way to evict.
    fn choose_victim(&mut self, set: usize, eligible: &[bool]) -> usize;
}

/// Builds the policy named by the configuration.
pub fn build(policy: PolicyType, sets: usize, ways: usize) -> Box<dyn ReplacementPolicy> {
    match policy {
        PolicyType::Lru => Box::new(LruPolicy::new(sets, ways)),
        PolicyType::Plru => Box::new(PlruPolicy::new(sets, ways)),
        PolicyType::Fifo => Box::new(FifoPolicy::new(sets, ways)),
        PolicyType::Random => Box::new(RandomPolicy::new(sets, ways)),
    }
}

/// First eligible way at or after `start`, wrapping around the set.
fn first_eligible_from(start: usize, eligible: &[bool]) -> usize {
    let ways = eligible.len();
    (0..ways)
        .map(|i| (start + i) % ways)
        .find(|&way| eligible[way])
        .unwrap_or(start)
}
