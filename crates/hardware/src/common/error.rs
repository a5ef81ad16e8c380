//! Error types.
//!
//! The memory system has two error surfaces:
//! 1. **Configuration errors:** Raised while validating a `Config` or building a system from it.
//!    These are ordinary `Result` errors and fail fast at startup.
//! 2. **Coherence check failures:** Returned by the diagnostic invariant pass over a quiescent
//!    system. Violations detected while a transaction is running are not errors at all; they
//!    abort immediately through `protocol_assert!`.

use thiserror::Error;

use super::addr::NodeId;
use crate::coherence::state::{CacheState, DirectoryState};

/// Configuration rejected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The coherence protocol name is not one of `msi`, `mesi`, `mesif`.
    #[error("unknown coherence protocol `{0}`")]
    UnknownProtocol(String),

    /// The replacement policy name is not recognised.
    #[error("unknown replacement policy `{0}`")]
    UnknownPolicy(String),

    /// The directory type name is not recognised.
    #[error("unknown directory type `{0}`")]
    UnknownDirectoryType(String),

    /// The backing-store controller name is not recognised.
    #[error("unknown memory controller `{0}`")]
    UnknownController(String),

    /// Line size must be a power of two between 8 and 512 bytes.
    #[error("line size {0} must be a power of two between 8 and 512 bytes")]
    LineSize(usize),

    /// Cache size is not an exact, power-of-two number of sets.
    #[error("{cache}: {size} bytes cannot be split into {ways}-way sets of {line}-byte lines")]
    Geometry {
        /// Cache level name.
        cache: &'static str,
        /// Configured size in bytes.
        size: usize,
        /// Configured associativity.
        ways: usize,
        /// Line size in bytes.
        line: usize,
    },

    /// A mandatory cache level is disabled.
    #[error("{0} must be enabled")]
    MissingLevel(&'static str),

    /// Core sharing does not divide the core count or shrinks toward the last level.
    #[error("{cache}: shared_cores = {shared} is incompatible with {detail}")]
    Sharing {
        /// Cache level name.
        cache: &'static str,
        /// Configured `shared_cores`.
        shared: usize,
        /// What it conflicts with.
        detail: String,
    },

    /// A numeric parameter that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Several last-level instances exist but no directory keeps them coherent.
    #[error("{0} last-level cache instances need the directory to be enabled")]
    DirectoryRequired(usize),

    /// Directory geometry is inconsistent.
    #[error("directory: {total} entries cannot be split into {assoc}-way sets")]
    DirectoryGeometry {
        /// Total entries per home.
        total: usize,
        /// Associativity.
        assoc: usize,
    },

    /// JSON could not be parsed into a configuration.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Global coherence invariant that does not hold on a quiescent system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoherenceError {
    /// Messages are still in flight; invariants are only defined at quiescence.
    #[error("{0} coherence messages still in flight")]
    NotQuiescent(usize),

    /// More than one node holds a writable copy.
    #[error("line {address:#x}: writable in {nodes:?}")]
    MultipleWriters {
        /// Line address.
        address: u64,
        /// Nodes holding EXCLUSIVE or MODIFIED copies.
        nodes: Vec<NodeId>,
    },

    /// A node holds a writable copy while another node still holds any copy.
    #[error("line {address:#x}: {writer} holds it writable while {other} still caches it")]
    WriterWithSharers {
        /// Line address.
        address: u64,
        /// Node with the writable copy.
        writer: NodeId,
        /// Another node with a valid copy.
        other: NodeId,
    },

    /// A node caches a line the directory does not list it as sharing.
    #[error("line {address:#x}: {node} holds it in {state} but directory says {dir_state} without it")]
    UntrackedSharer {
        /// Line address.
        address: u64,
        /// Node holding the copy.
        node: NodeId,
        /// State of the copy at the node's last level.
        state: CacheState,
        /// Directory state of the entry (UNCACHED when no entry exists).
        dir_state: DirectoryState,
    },

    /// The directory lists a sharer that holds no copy.
    #[error("line {address:#x}: directory lists {node} but it holds no copy")]
    GhostSharer {
        /// Line address.
        address: u64,
        /// Listed node.
        node: NodeId,
    },

    /// A writable copy is not recorded as the directory owner.
    #[error("line {address:#x}: {node} holds it writable but directory owner is {owner:?} in {dir_state}")]
    OwnerMismatch {
        /// Line address.
        address: u64,
        /// Node holding the writable copy.
        node: NodeId,
        /// Owner recorded by the directory.
        owner: Option<NodeId>,
        /// Directory state of the entry.
        dir_state: DirectoryState,
    },

    /// An inner cache holds a line its next level does not.
    #[error("line {address:#x}: {cache} caches it but its next level does not")]
    Inclusion {
        /// Line address.
        address: u64,
        /// Name of the inner cache.
        cache: String,
    },

    /// Two nodes hold clean copies with different contents.
    #[error("line {address:#x}: {node} holds bytes that differ from other shared copies")]
    StaleCopy {
        /// Line address.
        address: u64,
        /// Node whose copy differs.
        node: NodeId,
    },
}
