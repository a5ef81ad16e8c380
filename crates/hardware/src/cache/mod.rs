//! Set-Associative Line Storage.
//!
//! This module implements the associative set store owned by every cache controller.
//! It provides:
//! 1. **Lookup:** Tag match on valid lines (`peek`, `state`).
//! 2. **Data:** One line of bytes per way, read and written at byte granularity.
//! 3. **Insertion:** Fill into an invalid way if one exists, otherwise evict the victim chosen
//!    by the replacement policy among the ways that may be evicted, and hand it back.
//! 4. **Invalidation:** Drop a line without touching the replacement state.
//!
//! The store knows nothing about coherence beyond the state it is told to record; the
//! controllers decide what to do with evicted lines.

/// Per-line metadata record.
pub mod block;

/// Cache replacement policy implementations (FIFO, LRU, PLRU, Random).
pub mod policies;

use self::block::CacheBlockInfo;
use self::policies::ReplacementPolicy;
use crate::coherence::CacheState;
use crate::common::line_base;
use crate::config::ReplacementPolicy as PolicyType;

/// A line displaced by an insertion.
#[derive(Debug, Clone)]
pub struct Evicted {
    /// Metadata of the displaced line, as it was before eviction.
    pub info: CacheBlockInfo,
    /// The displaced line's bytes.
    pub data: Box<[u8]>,
}

/// Set-associative store of line metadata and data.
#[derive(Debug)]
pub struct Cache {
    name: String,
    num_sets: usize,
    ways: usize,
    line_size: usize,
    line_shift: u32,
    blocks: Vec<CacheBlockInfo>,
    data: Vec<u8>,
    policy: Box<dyn ReplacementPolicy>,
}

impl Cache {
    /// Creates an empty store.
    ///
    /// # Arguments
    ///
    /// * `name` - Name used in logs and diagnostics.
    /// * `size_bytes` - Total capacity; must be `sets * ways * line_size` with a power-of-two set count.
    /// * `ways` - Associativity.
    /// * `line_size` - Line size in bytes (power of two).
    /// * `policy` - Replacement policy to build.
    pub fn new(
        name: impl Into<String>,
        size_bytes: usize,
        ways: usize,
        line_size: usize,
        policy: PolicyType,
    ) -> Self {
        let ways = ways.max(1);
        let num_sets = (size_bytes / (ways * line_size)).max(1);
        Self {
            name: name.into(),
            num_sets,
            ways,
            line_size,
            line_shift: line_size.trailing_zeros(),
            blocks: vec![CacheBlockInfo::default(); num_sets * ways],
            data: vec![0; num_sets * ways * line_size],
            policy: policies::build(policy, num_sets, ways),
        }
    }

    /// Name used in logs and diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of sets.
    pub const fn num_sets(&self) -> usize {
        self.num_sets
    }

    /// Associativity.
    pub const fn ways(&self) -> usize {
        self.ways
    }

    /// Line size in bytes.
    pub const fn line_size(&self) -> usize {
        self.line_size
    }

    /// Set index for an address.
    pub const fn set_index(&self, addr: u64) -> usize {
        ((addr >> self.line_shift) as usize) % self.num_sets
    }

    fn find(&self, addr: u64) -> Option<usize> {
        let tag = line_base(addr, self.line_size);
        let base = self.set_index(addr) * self.ways;
        (base..base + self.ways).find(|&slot| {
            let block = &self.blocks[slot];
            block.is_valid() && block.address() == tag
        })
    }

    fn slot_data(&self, slot: usize) -> &[u8] {
        let start = slot * self.line_size;
        &self.data[start..start + self.line_size]
    }

    fn slot_data_mut(&mut self, slot: usize) -> &mut [u8] {
        let start = slot * self.line_size;
        &mut self.data[start..start + self.line_size]
    }

    fn touch_slot(&mut self, slot: usize) {
        let set = slot / self.ways;
        self.policy.on_access(set, slot % self.ways);
    }

    /// Metadata of a valid line, without touching replacement state.
    pub fn peek(&self, addr: u64) -> Option<&CacheBlockInfo> {
        self.find(addr).map(|slot| &self.blocks[slot])
    }

    /// Mutable metadata of a valid line, without touching replacement state.
    pub fn peek_mut(&mut self, addr: u64) -> Option<&mut CacheBlockInfo> {
        self.find(addr).map(|slot| &mut self.blocks[slot])
    }

    /// Coherence state of a line, `Invalid` when absent.
    pub fn state(&self, addr: u64) -> CacheState {
        self.peek(addr).map_or(CacheState::Invalid, CacheBlockInfo::state)
    }

    /// Sets the state of a present line.
    ///
    /// # Returns
    ///
    /// `false` if the line is not present.
    pub fn set_state(&mut self, addr: u64, state: CacheState) -> bool {
        self.peek_mut(addr).is_some_and(|block| {
            block.set_state(state);
            true
        })
    }

    /// Marks a line as recently used.
    pub fn touch(&mut self, addr: u64) -> bool {
        self.find(addr).is_some_and(|slot| {
            self.touch_slot(slot);
            true
        })
    }

    /// Copies bytes out of a line.
    ///
    /// # Arguments
    ///
    /// * `addr` - Line address.
    /// * `offset` - First byte within the line.
    /// * `buf` - Destination; its length is the number of bytes read.
    /// * `update_replacement` - Whether this counts as a use for the replacement policy.
    ///
    /// # Returns
    ///
    /// `false` if the line is not present.
    pub fn read(&mut self, addr: u64, offset: usize, buf: &mut [u8], update_replacement: bool) -> bool {
        let Some(slot) = self.find(addr) else {
            return false;
        };
        buf.copy_from_slice(&self.slot_data(slot)[offset..offset + buf.len()]);
        if update_replacement {
            self.touch_slot(slot);
        }
        true
    }

    /// Copies bytes into a line. See [`Cache::read`].
    pub fn write(&mut self, addr: u64, offset: usize, data: &[u8], update_replacement: bool) -> bool {
        let Some(slot) = self.find(addr) else {
            return false;
        };
        self.slot_data_mut(slot)[offset..offset + data.len()].copy_from_slice(data);
        if update_replacement {
            self.touch_slot(slot);
        }
        true
    }

    /// The bytes of a present line.
    pub fn line_data(&self, addr: u64) -> Option<&[u8]> {
        self.find(addr).map(|slot| self.slot_data(slot))
    }

    /// Installs a line, evicting a victim if the set is full.
    ///
    /// An invalid way is always preferred. Otherwise the policy picks among ways whose
    /// line is not `SharedUpgrading`.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address of the line (any byte within it).
    /// * `state` - Initial coherence state.
    /// * `fill` - Line contents; zero-filled when `None`.
    ///
    /// # Returns
    ///
    /// The displaced valid line, if any.
    pub fn insert(&mut self, addr: u64, state: CacheState, fill: Option<&[u8]>) -> Option<Evicted> {
        let line = line_base(addr, self.line_size);
        let set = self.set_index(addr);
        let base = set * self.ways;

        let way = if let Some(way) = (0..self.ways).find(|&w| !self.blocks[base + w].is_valid()) {
            way
        } else {
            let eligible: Vec<bool> = (0..self.ways)
                .map(|w| self.blocks[base + w].state() != CacheState::SharedUpgrading)
                .collect();
            protocol_assert!(
                eligible.iter().any(|&e| e),
                "{}: no replaceable way in set {set} for {line:#x}",
                self.name
            );
            let way = self.policy.choose_victim(set, &eligible);
            protocol_assert!(
                eligible[way],
                "{}: policy picked way {way} of set {set}, which has an upgrade in flight",
                self.name
            );
            way
        };

        let slot = base + way;
        let evicted = self.blocks[slot].is_valid().then(|| Evicted {
            info: self.blocks[slot].clone(),
            data: self.slot_data(slot).into(),
        });

        self.blocks[slot] = CacheBlockInfo::new(line, state);
        let line_size = self.line_size;
        let dst = self.slot_data_mut(slot);
        match fill {
            Some(bytes) => dst.copy_from_slice(&bytes[..line_size]),
            None => dst.fill(0),
        }
        self.policy.on_access(set, way);
        evicted
    }

    /// Drops a line.
    ///
    /// # Returns
    ///
    /// `false` if the line was not present.
    pub fn invalidate(&mut self, addr: u64) -> bool {
        self.find(addr).is_some_and(|slot| {
            self.blocks[slot] = CacheBlockInfo::default();
            true
        })
    }

    /// Every valid line.
    pub fn valid_lines(&self) -> impl Iterator<Item = &CacheBlockInfo> + '_ {
        self.blocks.iter().filter(|block| block.is_valid())
    }
}
