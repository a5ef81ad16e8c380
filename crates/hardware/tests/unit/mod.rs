//! # Unit and Protocol Tests
//!
//! Building blocks first, then whole-system protocol behaviour.

/// Configuration parsing, defaults and validation.
pub mod config;


/// Replacement policy victim selection.
pub mod policies;

/// MSHR table and outstanding-miss slots.
pub mod mshr;

/// Per-address request queues.
pub mod req_queue;

/// Backing store and latency controllers.
pub mod dram;



/// Whole-system protocol scenarios and message traces.
pub mod protocol;




/// Statistics counters and sinks.
pub mod stats;
