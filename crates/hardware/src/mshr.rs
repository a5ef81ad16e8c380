//! Outstanding-miss tracking.
//!
//! This module provides the two per-controller structures that account for misses which
//! have not finished yet:
//! 1. **MSHR table:** A bounded map from line address to the issue and completion times of its
//!    most recent miss. A later access to the same line while that miss is still completing is
//!    charged the remaining time instead of a second full miss.
//! 2. **Contention slots:** An optional limit on the number of misses a first-level controller
//!    can have in flight at once. A new miss starts no earlier than the earliest free slot.

use std::collections::HashMap;

/// Issue and completion time of one miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MshrEntry {
    /// Time the miss was issued.
    pub t_issue: u64,
    /// Time the miss completed (data available).
    pub t_complete: u64,
}

/// Bounded table of recent misses.
///
/// The table never holds more than `capacity` entries. Inserting into a full table drops the
/// entries with the earliest completion times; the timestamps of the surviving entries are
/// never touched.
#[derive(Debug, Clone)]
pub struct Mshr {
    entries: HashMap<u64, MshrEntry>,
    capacity: usize,
}

impl Mshr {
    /// Creates an empty table holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records a miss, replacing any previous entry for the same line.
    ///
    /// # Arguments
    ///
    /// * `address` - Line address.
    /// * `t_issue` - Issue time.
    /// * `t_complete` - Completion time.
    pub fn insert(&mut self, address: u64, t_issue: u64, t_complete: u64) {
        let _ = self.entries.insert(address, MshrEntry { t_issue, t_complete });
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .filter(|&(&addr, _)| addr != address)
                .min_by_key(|&(&addr, entry)| (entry.t_complete, addr))
                .map(|(&addr, _)| addr);
            match oldest {
                Some(addr) => {
                    let _ = self.entries.remove(&addr);
                }
                None => break,
            }
        }
    }

    /// Entry for a line, if one is recorded.
    pub fn get(&self, address: u64) -> Option<MshrEntry> {
        self.entries.get(&address).copied()
    }

    /// Remaining time of an in-flight miss on `address` as seen at `now`.
    ///
    /// # Returns
    ///
    /// `Some(delay)` when a miss on the line was issued before `now` and completes after it.
    pub fn overlap(&self, address: u64, now: u64) -> Option<u64> {
        self.entries
            .get(&address)
            .filter(|entry| entry.t_issue < now && now < entry.t_complete)
            .map(|entry| entry.t_complete - now)
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entry is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Limit on concurrently outstanding misses.
///
/// Each slot holds the time at which it becomes free. With zero slots the model is disabled
/// and every miss starts when it is issued.
#[derive(Debug, Clone, Default)]
pub struct OutstandingMisses {
    slots: Vec<u64>,
    completions: HashMap<u64, u64>,
}

impl OutstandingMisses {
    /// Creates the model with `slots` concurrent misses (0 = unlimited).
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![0; slots],
            completions: HashMap::new(),
        }
    }

    /// Returns `true` if misses are limited.
    pub fn is_limited(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Earliest time a miss issued at `t` can start.
    pub fn start_time(&self, t: u64) -> u64 {
        self.slots.iter().min().map_or(t, |&free| free.max(t))
    }

    /// Books the earliest free slot for a miss and records its completion per line.
    ///
    /// # Arguments
    ///
    /// * `t_start` - Time the miss started (as returned by `start_time`).
    /// * `t_done` - Time the miss completes.
    /// * `address` - Line address.
    pub fn record(&mut self, t_start: u64, t_done: u64, address: u64) {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .filter(|free| **free <= t_start)
            .min_by_key(|free| **free)
        {
            *slot = t_done;
        } else if let Some(slot) = self.slots.iter_mut().min_by_key(|free| **free) {
            *slot = t_done;
        }
        if self.is_limited() {
            let _ = self.completions.insert(address, t_done);
            // Misses that ended before every slot was rebooked are forgotten.
            let horizon = self.slots.iter().min().copied().unwrap_or(0);
            self.completions.retain(|_, done| *done >= horizon);
        }
    }

    /// Completion time of the last miss recorded for a line.
    pub fn tag_completion(&self, address: u64) -> Option<u64> {
        self.completions.get(&address).copied()
    }

    /// Number of lines with a recorded completion.
    pub fn tracked_lines(&self) -> usize {
        self.completions.len()
    }
}
