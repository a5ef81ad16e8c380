//! Concurrency support for driving the engine from one thread per core.
//!
//! 1. **Set locks:** `SetLock`, a reader/writer lock per last-level set with an upgrade path
//!    that cannot deadlock two would-be upgraders.
//! 2. **Front end:** `SharedSystem`, which takes a set lock shared for accesses confined to
//!    the first level and exclusive for anything that leaves it.

/// Per-set reader/writer lock.
pub mod setlock;

/// Thread-safe front end.
pub mod shared;

pub use setlock::{SetLock, SetReadGuard, SetWriteGuard};
pub use shared::SharedSystem;
