//! Directory-based cache-coherence protocol engine.
//!
//! This crate models the coherent memory hierarchy of a multi-core machine:
//! 1. **Private caches:** Per-core cache controllers with set-associative storage, pluggable
//!    replacement, MSHRs and an inclusive eviction/writeback protocol.
//! 2. **Directory:** Home-sharded directory controllers that serialize transactions per line and
//!    drive MSI, MESI or MESIF coherence between last-level caches and the backing store.
//! 3. **Transport:** An ordered message network carrying the twelve coherence message types.
//! 4. **Concurrency:** Set locks and a thread-safe front end so one thread per core can drive
//!    the engine.
//! 5. **Configuration and statistics:** JSON configuration, validation, and named counters pushed
//!    into an explicit statistics sink.

/// Aborts with address and state context when a coherence invariant does not hold.
macro_rules! protocol_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            let msg = format!($($arg)+);
            tracing::error!(target: "cohsim::protocol", "{msg}");
            panic!("coherence protocol violation: {msg}");
        }
    };
}

/// Aborts unconditionally on a provably impossible protocol state.
macro_rules! protocol_fail {
    ($($arg:tt)+) => {{
        let msg = format!($($arg)+);
        tracing::error!(target: "cohsim::protocol", "{msg}");
        panic!("coherence protocol violation: {msg}")
    }};
}

/// Set-associative line storage and replacement policies.
pub mod cache;
/// Coherence states, transition reasons and messages.
pub mod coherence;
/// Identifiers, memory operation types and errors.
pub mod common;
/// Configuration structures, defaults and validation.
pub mod config;
/// Directory entries, directory cache and directory controller.
pub mod directory;
/// Backing store and its latency controllers.
pub mod dram;
/// Outstanding-miss tracking.
pub mod mshr;
/// Ordered coherence message transport.
pub mod network;
/// Per-address request queues.
pub mod req_queue;
/// Statistics counters and sinks.
pub mod stats;
/// Set locks and the thread-safe front end.
pub mod sync;
/// The memory system: controller arena, access path and eviction protocol.
pub mod system;

/// Root configuration type; use `Config::default()` or `Config::from_json`.
pub use crate::config::Config;
/// Memory system built from a configuration; drives every access.
pub use crate::system::{AccessResult, MemorySystem};
/// Thread-safe wrapper for one-thread-per-core simulation.
pub use crate::sync::SharedSystem;
