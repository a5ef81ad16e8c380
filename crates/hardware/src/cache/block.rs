//! Per-line metadata record.

use crate::coherence::CacheState;

/// Optional per-line tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOption {
    /// Installed by a prefetch and not yet touched by a demand access.
    Prefetch,
    /// Installed by an unmodeled (warmup) access.
    Warmup,
}

impl BlockOption {
    const fn bit(self) -> u8 {
        match self {
            Self::Prefetch => 1,
            Self::Warmup => 2,
        }
    }
}

/// Metadata for one cached line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheBlockInfo {
    address: u64,
    state: CacheState,
    options: u8,
    used: u64,
    owner: Option<usize>,
    cached_locs: u64,
}

impl CacheBlockInfo {
    /// Creates a record for a freshly installed line.
    pub const fn new(address: u64, state: CacheState) -> Self {
        Self {
            address,
            state,
            options: 0,
            used: 0,
            owner: None,
            cached_locs: 0,
        }
    }

    /// Line address.
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Coherence state.
    pub const fn state(&self) -> CacheState {
        self.state
    }

    /// Sets the coherence state.
    pub const fn set_state(&mut self, state: CacheState) {
        self.state = state;
    }

    /// Returns `true` unless the line is invalid.
    pub const fn is_valid(&self) -> bool {
        !matches!(self.state, CacheState::Invalid)
    }

    /// Returns `true` if the option is set.
    pub const fn has_option(&self, option: BlockOption) -> bool {
        self.options & option.bit() != 0
    }

    /// Sets an option.
    pub const fn set_option(&mut self, option: BlockOption) {
        self.options |= option.bit();
    }

    /// Clears an option.
    pub const fn clear_option(&mut self, option: BlockOption) {
        self.options &= !option.bit();
    }

    /// Marks the 8-byte words covered by `offset..offset + len` as used.
    pub const fn mark_used(&mut self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let first = offset / 8;
        let last = (offset + len - 1) / 8;
        let mut word = first;
        while word <= last && word < 64 {
            self.used |= 1 << word;
            word += 1;
        }
    }

    /// Number of distinct 8-byte words touched since the line was installed.
    pub const fn used_words(&self) -> u32 {
        self.used.count_ones()
    }

    /// Core that caused the line to be installed, for telemetry.
    pub const fn owner(&self) -> Option<usize> {
        self.owner
    }

    /// Records the installing core.
    pub const fn set_owner(&mut self, owner: Option<usize>) {
        self.owner = owner;
    }

    /// Marks previous-level cache `index` as holding a copy.
    pub const fn set_cached_loc(&mut self, index: usize) {
        self.cached_locs |= 1 << index;
    }

    /// Clears previous-level cache `index`.
    pub const fn clear_cached_loc(&mut self, index: usize) {
        self.cached_locs &= !(1 << index);
    }

    /// Bitmask of previous-level caches holding a copy.
    pub const fn cached_locs(&self) -> u64 {
        self.cached_locs
    }
}
