//! # Outstanding-Miss Tests
//!
//! MSHR overlap windows, bounded capacity, and the contention-slot model.

use cohsim_core::mshr::{Mshr, MshrEntry, OutstandingMisses};
use pretty_assertions::assert_eq;
use rstest::rstest;

// ══════════════════════════════════════════════════════════
// 1. MSHR table
// ══════════════════════════════════════════════════════════

#[rstest]
#[case(10, None)]
#[case(11, Some(19))]
#[case(29, Some(1))]
#[case(30, None)]
#[case(40, None)]
fn overlap_is_strictly_inside_window(#[case] now: u64, #[case] expected: Option<u64>) {
    let mut mshr = Mshr::new(4);
    mshr.insert(0x40, 10, 30);
    assert_eq!(mshr.overlap(0x40, now), expected);
}

#[test]
fn overlap_is_per_line() {
    let mut mshr = Mshr::new(4);
    mshr.insert(0x40, 0, 100);
    assert_eq!(mshr.overlap(0x80, 50), None);
}

#[test]
fn reinsert_replaces_entry() {
    let mut mshr = Mshr::new(4);
    mshr.insert(0x40, 0, 10);
    mshr.insert(0x40, 20, 50);
    assert_eq!(mshr.len(), 1);
    assert_eq!(
        mshr.get(0x40),
        Some(MshrEntry {
            t_issue: 20,
            t_complete: 50
        })
    );
}

/// A full table keeps the new entry even if it completes first.
#[test]
fn prune_never_drops_the_inserted_line() {
    let mut mshr = Mshr::new(2);
    mshr.insert(0x40, 0, 100);
    mshr.insert(0x80, 0, 200);
    mshr.insert(0xc0, 0, 5);
    assert_eq!(mshr.len(), 2);
    assert!(mshr.get(0xc0).is_some());
    assert!(mshr.get(0x40).is_none());
    assert_eq!(mshr.get(0x80).map(|e| e.t_complete), Some(200));
}

#[test]
fn zero_capacity_is_clamped() {
    let mut mshr = Mshr::new(0);
    assert_eq!(mshr.capacity(), 1);
    assert!(mshr.is_empty());
    mshr.insert(0x40, 0, 1);
    mshr.insert(0x80, 0, 2);
    assert_eq!(mshr.len(), 1);
    assert!(mshr.get(0x80).is_some());
}

// ══════════════════════════════════════════════════════════
// 2. Contention slots
// ══════════════════════════════════════════════════════════

#[test]
fn limited_slots_delay_later_misses() {
    let mut misses = OutstandingMisses::new(1);
    assert!(misses.is_limited());
    assert_eq!(misses.start_time(0), 0);
    misses.record(0, 100, 0x40);
    assert_eq!(misses.start_time(10), 100);
    assert_eq!(misses.start_time(150), 150);
    assert_eq!(misses.tag_completion(0x40), Some(100));
}

#[test]
fn two_slots_take_the_earliest_free() {
    let mut misses = OutstandingMisses::new(2);
    misses.record(0, 100, 0x40);
    assert_eq!(misses.start_time(5), 5);
    misses.record(5, 60, 0x80);
    assert_eq!(misses.start_time(10), 60);
    misses.record(60, 120, 0xc0);
    assert_eq!(misses.start_time(10), 100);
    assert_eq!(misses.tag_completion(0xc0), Some(120));
}

/// Completions stay bounded once every slot has moved past them.
#[test]
fn completions_are_forgotten_once_slots_move_on() {
    let mut misses = OutstandingMisses::new(2);
    misses.record(0, 100, 0x40);
    misses.record(10, 110, 0x80);
    misses.record(100, 200, 0xc0);
    assert_eq!(misses.tag_completion(0x40), None);
    assert_eq!(misses.tag_completion(0x80), Some(110));
    assert_eq!(misses.tag_completion(0xc0), Some(200));
    assert_eq!(misses.tracked_lines(), 2);

    for i in 0..64u64 {
        misses.record(200 + i * 10, 300 + i * 10, 0x1000 + i * 64);
    }
    assert!(misses.tracked_lines() <= 3);
}
