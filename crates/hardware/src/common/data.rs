//! Memory operation types.
//!
//! This module classifies the requests that flow through the cache hierarchy:
//! 1. **Operations:** What the requester wants to do with the line (`MemOp`).
//! 2. **Ports:** Which first-level cache a core request enters through (`Port`).
//! 3. **Levels:** The named position of a controller in the hierarchy (`CacheLevel`).
//! 4. **Prefetch tagging:** Whether a request was issued on behalf of a prefetcher (`Prefetch`).

use std::fmt;

/// Memory operation requested from a cache controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemOp {
    /// Plain load; needs a readable line.
    Read,

    /// Load that intends to write the line shortly (atomics, read-for-ownership).
    ///
    /// Needs a writable line but returns data like a load.
    ReadEx,

    /// Store; needs a writable line.
    Write,
}

impl MemOp {
    /// Returns `true` if the operation needs write permission on the line.
    #[inline]
    pub const fn needs_write(self) -> bool {
        matches!(self, Self::ReadEx | Self::Write)
    }
}

impl fmt::Display for MemOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "READ",
            Self::ReadEx => "READ_EX",
            Self::Write => "WRITE",
        })
    }
}

/// First-level entry point of a core request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    /// Instruction fetches, served by the L1 instruction cache.
    Instruction,
    /// Loads and stores, served by the L1 data cache.
    Data,
}

/// Position of a cache controller in the hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheLevel {
    /// First-level instruction cache.
    L1I,
    /// First-level data cache.
    L1D,
    /// Unified second-level cache.
    L2,
    /// Unified third-level cache.
    L3,
}

impl CacheLevel {
    /// Hierarchy depth, 1 for the first-level caches.
    pub const fn depth(self) -> u8 {
        match self {
            Self::L1I | Self::L1D => 1,
            Self::L2 => 2,
            Self::L3 => 3,
        }
    }

    /// Short component name used in logs and statistics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::L1I => "L1-I",
            Self::L1D => "L1-D",
            Self::L2 => "L2",
            Self::L3 => "L3",
        }
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Prefetch tagging carried by a request as it descends the hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Prefetch {
    /// Demand access.
    #[default]
    None,
    /// Prefetch issued by the controller currently handling the request.
    Own,
    /// Prefetch issued by an inner controller and forwarded here.
    Other,
}

impl Prefetch {
    /// Tag to use when the request is forwarded one level further out.
    pub const fn forwarded(self) -> Self {
        match self {
            Self::Own => Self::Other,
            other => other,
        }
    }

    /// Returns `true` for any prefetch request.
    pub const fn is_prefetch(self) -> bool {
        !matches!(self, Self::None)
    }
}
