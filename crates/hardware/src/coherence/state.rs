//! Coherence states and transition bookkeeping.
//!
//! 1. **Line state:** `CacheState`, the per-copy permission held by a private cache.
//! 2. **Directory state:** `DirectoryState`, the global view kept by the home directory.
//! 3. **Transition reasons:** `Transition`, why a line changed state (for statistics).
//! 4. **Hit location:** `HitWhere`, where an access was finally satisfied.

use std::fmt;

use serde::Serialize;

use crate::common::CacheLevel;

/// Coherence state of one copy of a line in a private cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub enum CacheState {
    /// No valid copy.
    #[default]
    Invalid,
    /// Clean, read-only copy; other caches may hold it too.
    Shared,
    /// Read-only copy whose upgrade request is in flight at the directory.
    ///
    /// Lines in this state are never chosen as replacement victims.
    SharedUpgrading,
    /// Clean copy held by exactly one node; may be written without asking the directory.
    Exclusive,
    /// Dirty copy that others may share read-only. Never produced by the directory here.
    Owned,
    /// Dirty copy held by exactly one node.
    Modified,
}

impl CacheState {
    /// Number of states, for per-state counter arrays.
    pub const COUNT: usize = 6;

    /// Every state, in counter order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Invalid,
        Self::Shared,
        Self::SharedUpgrading,
        Self::Exclusive,
        Self::Owned,
        Self::Modified,
    ];

    /// Returns `true` if a load can be served from this copy.
    #[inline]
    pub const fn readable(self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Returns `true` if a store can be served from this copy.
    #[inline]
    pub const fn writable(self) -> bool {
        matches!(self, Self::Exclusive | Self::Modified)
    }

    /// Returns `true` if the copy is newer than the backing store.
    #[inline]
    pub const fn is_dirty(self) -> bool {
        matches!(self, Self::Modified | Self::Owned)
    }

    /// Position in [`CacheState::ALL`].
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Single-letter name used in compact statistics keys.
    pub const fn letter(self) -> char {
        match self {
            Self::Invalid => 'I',
            Self::Shared => 'S',
            Self::SharedUpgrading => 'u',
            Self::Exclusive => 'E',
            Self::Owned => 'O',
            Self::Modified => 'M',
        }
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Invalid => "INVALID",
            Self::Shared => "SHARED",
            Self::SharedUpgrading => "SHARED_UPGRADING",
            Self::Exclusive => "EXCLUSIVE",
            Self::Owned => "OWNED",
            Self::Modified => "MODIFIED",
        })
    }
}

/// Global state of a line as recorded by its home directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
pub enum DirectoryState {
    /// No node caches the line.
    #[default]
    Uncached,
    /// One or more nodes hold clean read-only copies.
    Shared,
    /// One node holds a clean copy it may silently upgrade.
    Exclusive,
    /// One node holds a dirty copy that others share. Unsupported by this directory.
    Owned,
    /// One node holds the only, dirty copy.
    Modified,
}

impl fmt::Display for DirectoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uncached => "UNCACHED",
            Self::Shared => "SHARED",
            Self::Exclusive => "EXCLUSIVE",
            Self::Owned => "OWNED",
            Self::Modified => "MODIFIED",
        })
    }
}

/// Reason a line changed state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Filled for a core read.
    CoreRd,
    /// Filled or promoted for a core write.
    CoreWr,
    /// Filled for a read-exclusive.
    CoreRdEx,
    /// Promoted from shared to modified.
    Upgrade,
    /// Chosen as a replacement victim.
    Evict,
    /// Dropped because an outer level evicted it (seen from two or more levels in).
    EvictLower,
    /// Dropped because the next level evicted it.
    BackInval,
    /// Downgraded or invalidated on behalf of another requester.
    Coherency,
}

impl Transition {
    /// Number of reasons, for counter arrays.
    pub const COUNT: usize = 8;

    /// Every reason, in counter order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::CoreRd,
        Self::CoreWr,
        Self::CoreRdEx,
        Self::Upgrade,
        Self::Evict,
        Self::EvictLower,
        Self::BackInval,
        Self::Coherency,
    ];

    /// Position in [`Transition::ALL`].
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Counter-key name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::CoreRd => "core-rd",
            Self::CoreWr => "core-wr",
            Self::CoreRdEx => "core-rdex",
            Self::Upgrade => "upgrade",
            Self::Evict => "evict",
            Self::EvictLower => "evict-lower",
            Self::BackInval => "backinval",
            Self::Coherency => "coherency",
        }
    }
}

/// Where an access was finally satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HitWhere {
    /// Hit in the named cache.
    Cache(CacheLevel),
    /// Hit in the named cache after a sibling handed back dirty data.
    Sibling(CacheLevel),
    /// Served through the directory from another node's cache, or an upgrade grant.
    Remote,
    /// Served from the backing store.
    Dram,
    /// Not satisfied yet; the request is waiting on the directory.
    Miss,
}

impl fmt::Display for HitWhere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache(level) => write!(f, "{level}"),
            Self::Sibling(level) => write!(f, "{level}-sibling"),
            Self::Remote => f.write_str("remote-cache"),
            Self::Dram => f.write_str("dram"),
            Self::Miss => f.write_str("miss"),
        }
    }
}
