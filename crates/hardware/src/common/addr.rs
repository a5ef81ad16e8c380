//! Identifiers and line-address arithmetic.
//!
//! This module defines the small strong types used to name things inside the memory system:
//! 1. **Arena indices:** `CacheId` selects a controller in the memory system's controller arena.
//! 2. **Network identities:** `NodeId` names a last-level cache instance as seen by the directory.
//! 3. **Line arithmetic:** Alignment helpers shared by the controllers and the directory.

use std::fmt;

/// Index of a cache controller inside the memory system's controller arena.
///
/// Controllers reference their next level and their previous levels through these
/// indices rather than through pointers, so the hierarchy graph has no ownership cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheId(pub usize);

/// Identity of a last-level cache instance on the coherence network.
///
/// The directory tracks sharers and owners by `NodeId`. A node stands for every core
/// whose private hierarchy drains into that last-level instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Returns the address of the line containing `addr`.
///
/// `line_size` must be a power of two.
#[inline]
pub const fn line_base(addr: u64, line_size: usize) -> u64 {
    addr & !(line_size as u64 - 1)
}

/// Returns the byte offset of `addr` within its line.
#[inline]
pub const fn line_offset(addr: u64, line_size: usize) -> usize {
    (addr & (line_size as u64 - 1)) as usize
}

/// Returns `true` when `addr` is the first byte of a line.
#[inline]
pub const fn is_line_aligned(addr: u64, line_size: usize) -> bool {
    line_offset(addr, line_size) == 0
}

/// Returns the global line number of `addr` (address divided by the line size).
#[inline]
pub const fn line_number(addr: u64, line_size: usize) -> u64 {
    addr >> line_size.trailing_zeros()
}
