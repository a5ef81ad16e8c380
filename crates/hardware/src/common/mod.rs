//! Common types used throughout the memory system.
//!
//! This module provides the building blocks shared by every controller:
//! 1. **Identifiers:** Arena indices for controllers and network identities for last-level nodes.
//! 2. **Line arithmetic:** Alignment and offset helpers.
//! 3. **Memory operations:** Operation, port, level and prefetch classifications.
//! 4. **Error handling:** Configuration errors and coherence check failures.

/// Identifiers and line-address helpers.
pub mod addr;

/// Memory operation classifications.
pub mod data;

/// Error types.
pub mod error;

pub use addr::{CacheId, NodeId, is_line_aligned, line_base, line_number, line_offset};
pub use data::{CacheLevel, MemOp, Port, Prefetch};
pub use error::{CoherenceError, ConfigError};
