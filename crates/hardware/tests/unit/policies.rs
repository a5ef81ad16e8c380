//! # Replacement Policy Tests
//!
//! Victim selection for LRU, PLRU, FIFO and Random, with and without ineligible ways.

use cohsim_core::cache::policies::{FifoPolicy, LruPolicy, PlruPolicy, RandomPolicy, ReplacementPolicy};
use proptest::prelude::*;

const ALL: [bool; 4] = [true; 4];

// ══════════════════════════════════════════════════════════
// 1. LRU
// ══════════════════════════════════════════════════════════

/// Fresh stack is [0, 1, 2, 3] with way 0 most recent.
#[test]
fn lru_initial_victim_is_last_way() {
    let mut policy = LruPolicy::new(1, 4);
    assert_eq!(policy.choose_victim(0, &ALL), 3);
}

#[test]
fn lru_evicts_least_recent_after_reaccess() {
    let mut policy = LruPolicy::new(1, 4);
    for way in 0..4 {
        policy.on_access(0, way);
    }
    assert_eq!(policy.choose_victim(0, &ALL), 0);
    policy.on_access(0, 0);
    assert_eq!(policy.choose_victim(0, &ALL), 1);
}

#[test]
fn lru_skips_ineligible_ways() {
    let mut policy = LruPolicy::new(1, 4);
    for way in 0..4 {
        policy.on_access(0, way);
    }
    assert_eq!(policy.choose_victim(0, &[false, true, true, true]), 1);
    assert_eq!(policy.choose_victim(0, &[false, false, true, true]), 2);
}

#[test]
fn lru_sets_are_independent() {
    let mut policy = LruPolicy::new(2, 2);
    policy.on_access(0, 0);
    policy.on_access(1, 1);
    assert_eq!(policy.choose_victim(0, &[true, true]), 1);
    assert_eq!(policy.choose_victim(1, &[true, true]), 0);
}

// ══════════════════════════════════════════════════════════
// 2. PLRU
// ══════════════════════════════════════════════════════════

#[test]
fn plru_picks_first_way_without_recency_bit() {
    let mut policy = PlruPolicy::new(1, 4);
    policy.on_access(0, 0);
    policy.on_access(0, 1);
    assert_eq!(policy.choose_victim(0, &ALL), 2);
}

/// Setting the last bit clears every other bit.
#[test]
fn plru_resets_when_all_bits_set() {
    let mut policy = PlruPolicy::new(1, 4);
    for way in 0..4 {
        policy.on_access(0, way);
    }
    assert_eq!(policy.choose_victim(0, &ALL), 0);
}

#[test]
fn plru_falls_back_to_first_eligible() {
    let mut policy = PlruPolicy::new(1, 4);
    policy.on_access(0, 0);
    policy.on_access(0, 2);
    assert_eq!(policy.choose_victim(0, &[true, false, true, false]), 0);
}

// ══════════════════════════════════════════════════════════
// 3. FIFO
// ══════════════════════════════════════════════════════════

#[test]
fn fifo_evicts_in_fill_order() {
    let mut policy = FifoPolicy::new(1, 3);
    for way in 0..3 {
        policy.on_access(0, way);
    }
    assert_eq!(policy.choose_victim(0, &[true; 3]), 0);
    policy.on_access(0, 0);
    assert_eq!(policy.choose_victim(0, &[true; 3]), 1);
}

#[test]
fn fifo_hits_do_not_reorder() {
    let mut policy = FifoPolicy::new(1, 3);
    for way in 0..3 {
        policy.on_access(0, way);
    }
    policy.on_access(0, 2);
    assert_eq!(policy.choose_victim(0, &[true; 3]), 0);
}

#[test]
fn fifo_wraps_past_ineligible_way() {
    let mut policy = FifoPolicy::new(1, 3);
    for way in 0..3 {
        policy.on_access(0, way);
    }
    assert_eq!(policy.choose_victim(0, &[false, false, true]), 2);
}

// ══════════════════════════════════════════════════════════
// 4. Random
// ══════════════════════════════════════════════════════════

#[test]
fn random_is_reproducible() {
    let mut a = RandomPolicy::new(1, 8);
    let mut b = RandomPolicy::new(1, 8);
    let all = [true; 8];
    let picks_a: Vec<usize> = (0..16).map(|_| a.choose_victim(0, &all)).collect();
    let picks_b: Vec<usize> = (0..16).map(|_| b.choose_victim(0, &all)).collect();
    assert_eq!(picks_a, picks_b);
    assert!(picks_a.iter().any(|&w| w != picks_a[0]), "victims never vary: {picks_a:?}");
}

// ══════════════════════════════════════════════════════════
// 5. Eligibility contract
// ══════════════════════════════════════════════════════════

fn policies(ways: usize) -> Vec<Box<dyn ReplacementPolicy>> {
    vec![
        Box::new(LruPolicy::new(1, ways)),
        Box::new(PlruPolicy::new(1, ways)),
        Box::new(FifoPolicy::new(1, ways)),
        Box::new(RandomPolicy::new(1, ways)),
    ]
}

proptest! {
    /// Whatever the history, a policy only returns a way the caller marked evictable.
    #[test]
    fn victim_is_always_eligible(
        accesses in prop::collection::vec(0usize..8, 0..64),
        mask in 1u8..=255,
    ) {
        let eligible: Vec<bool> = (0..8).map(|w| mask & (1 << w) != 0).collect();
        for mut policy in policies(8) {
            for &way in &accesses {
                policy.on_access(0, way);
            }
            let victim = policy.choose_victim(0, &eligible);
            prop_assert!(eligible[victim], "{policy:?} chose way {victim} with mask {mask:#010b}");
        }
    }
}
