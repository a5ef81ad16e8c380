//! Directory: global sharer and owner bookkeeping.
//!
//! 1. **Entries:** `DirectoryEntry` records the state, sharers, owner and forwarder of one line.
//! 2. **Storage:** `DirectoryCache` holds a fixed number of entries per home and keeps evicted
//!    entries reachable until their nullify transaction completes.
//! 3. **Controller:** `DirectoryCntlr` serializes transactions per line and runs the protocol.
//!
//! A line's home is `(address / line_size) % homes`.

/// Per-line directory entry.
pub mod entry;

/// Set-associative entry storage.
pub mod cache;

/// Directory controller state machine.
pub mod cntlr;

pub use cache::DirectoryCache;
pub use cntlr::{DirCtx, DirectoryCntlr, ReqKind, ShmemReq};
pub use entry::DirectoryEntry;

use crate::common::line_number;

/// Home index of a line.
#[inline]
pub const fn home_of(address: u64, line_size: usize, homes: usize) -> usize {
    (line_number(address, line_size) % homes as u64) as usize
}
