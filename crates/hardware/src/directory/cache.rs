//! Set-associative storage for directory entries.
//!
//! Each home holds a fixed number of entries. When a set is full, the controller picks a
//! victim and calls [`DirectoryCache::replace`]: the victim moves to a replaced list, where
//! acknowledgements for its address still find it while its nullify transaction runs, and
//! the freed slot receives the new address.

use super::entry::DirectoryEntry;
use crate::config::DirectoryType;

/// Directory entry storage for one home.
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    slots: Vec<Option<DirectoryEntry>>,
    replaced: Vec<DirectoryEntry>,
    num_sets: usize,
    associativity: usize,
    line_shift: u32,
    homes: u64,
    kind: DirectoryType,
    max_hw_sharers: usize,
}

impl DirectoryCache {
    /// Creates an empty directory cache.
    ///
    /// # Arguments
    ///
    /// * `total_entries` - Entries in this home.
    /// * `associativity` - Entries per set.
    /// * `line_size` - Line size in bytes.
    /// * `homes` - Number of homes lines are interleaved across.
    /// * `kind` - Sharer-tracking organisation of new entries.
    /// * `max_hw_sharers` - Sharer capacity of new entries.
    pub fn new(
        total_entries: usize,
        associativity: usize,
        line_size: usize,
        homes: usize,
        kind: DirectoryType,
        max_hw_sharers: usize,
    ) -> Self {
        let associativity = associativity.max(1);
        let num_sets = (total_entries / associativity).max(1);
        Self {
            slots: vec![None; num_sets * associativity],
            replaced: Vec::new(),
            num_sets,
            associativity,
            line_shift: line_size.trailing_zeros(),
            homes: homes.max(1) as u64,
            kind,
            max_hw_sharers,
        }
    }

    fn set_range(&self, address: u64) -> std::ops::Range<usize> {
        let set = (((address >> self.line_shift) / self.homes) % self.num_sets as u64) as usize;
        let base = set * self.associativity;
        base..base + self.associativity
    }

    fn slot_of(&self, address: u64) -> Option<usize> {
        self.set_range(address)
            .find(|&slot| self.slots[slot].as_ref().is_some_and(|e| e.address() == address))
    }

    /// Entry for a line, including entries being nullified.
    pub fn get(&self, address: u64) -> Option<&DirectoryEntry> {
        match self.slot_of(address) {
            Some(slot) => self.slots[slot].as_ref(),
            None => self.replaced.iter().find(|e| e.address() == address),
        }
    }

    /// Mutable entry for a line, including entries being nullified.
    pub fn get_mut(&mut self, address: u64) -> Option<&mut DirectoryEntry> {
        match self.slot_of(address) {
            Some(slot) => self.slots[slot].as_mut(),
            None => self.replaced.iter_mut().find(|e| e.address() == address),
        }
    }

    /// Installs a fresh entry in a free slot of the line's set.
    ///
    /// # Returns
    ///
    /// `false` if the set is full.
    pub fn try_allocate(&mut self, address: u64) -> bool {
        let Some(slot) = self.set_range(address).find(|&slot| self.slots[slot].is_none()) else {
            return false;
        };
        self.slots[slot] = Some(DirectoryEntry::new(address, self.kind, self.max_hw_sharers));
        true
    }

    /// Entries currently occupying the line's set.
    pub fn set_entries(&self, address: u64) -> impl Iterator<Item = &DirectoryEntry> + '_ {
        self.set_range(address).filter_map(|slot| self.slots[slot].as_ref())
    }

    /// Moves `victim` to the replaced list and installs a fresh entry for `address` in its slot.
    pub fn replace(&mut self, victim: u64, address: u64) {
        let slot = self.slot_of(victim);
        protocol_assert!(
            slot.is_some(),
            "directory cache: victim {victim:#x} for {address:#x} is not resident"
        );
        if let Some(slot) = slot {
            let fresh = DirectoryEntry::new(address, self.kind, self.max_hw_sharers);
            if let Some(old) = self.slots[slot].replace(fresh) {
                self.replaced.push(old);
            }
        }
    }

    /// Drops the entry for a line, resident or replaced.
    pub fn invalidate(&mut self, address: u64) {
        if let Some(slot) = self.slot_of(address) {
            self.slots[slot] = None;
        } else {
            self.replaced.retain(|e| e.address() != address);
        }
    }

    /// Returns `true` if the line's entry is on the replaced list.
    pub fn is_replaced(&self, address: u64) -> bool {
        self.replaced.iter().any(|e| e.address() == address)
    }

    /// Every entry, resident and replaced.
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> + '_ {
        self.slots.iter().flatten().chain(self.replaced.iter())
    }
}
