//! Coherence vocabulary shared by caches and directories.
//!
//! 1. **States:** Line, directory and transition enumerations plus the hit-location tag.
//! 2. **Messages:** The twelve message types and the message record carried by the transport.

/// Coherence states and transition reasons.
pub mod state;

/// Coherence message types and records.
pub mod msg;

pub use msg::{Endpoint, MsgType, ShmemMsg};
pub use state::{CacheState, DirectoryState, HitWhere, Transition};
