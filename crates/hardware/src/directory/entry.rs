//! Directory entry: global state, sharers, owner and forwarder of one line.

use std::collections::BTreeSet;

use crate::coherence::DirectoryState;
use crate::common::NodeId;
use crate::config::DirectoryType;

/// Global bookkeeping for one line.
///
/// The sharer set is always exact. For `LimitedBroadcast` entries, exceeding `max_hw_sharers`
/// only changes how invalidations are sent (to every node instead of to the listed sharers).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    address: u64,
    state: DirectoryState,
    sharers: BTreeSet<NodeId>,
    owner: Option<NodeId>,
    forwarder: Option<NodeId>,
    kind: DirectoryType,
    max_hw_sharers: usize,
}

impl DirectoryEntry {
    /// Creates an `Uncached` entry.
    pub const fn new(address: u64, kind: DirectoryType, max_hw_sharers: usize) -> Self {
        Self {
            address,
            state: DirectoryState::Uncached,
            sharers: BTreeSet::new(),
            owner: None,
            forwarder: None,
            kind,
            max_hw_sharers,
        }
    }

    /// Line address.
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Directory state.
    pub const fn state(&self) -> DirectoryState {
        self.state
    }

    /// Sets the directory state.
    pub const fn set_state(&mut self, state: DirectoryState) {
        self.state = state;
    }

    /// Adds a sharer.
    ///
    /// # Returns
    ///
    /// `false` if the entry is a `LimitedNoBroadcast` entry at capacity; the caller must
    /// invalidate an existing sharer first.
    pub fn add_sharer(&mut self, node: NodeId) -> bool {
        protocol_assert!(
            !self.sharers.contains(&node),
            "directory {:#x}: {node} added twice as sharer",
            self.address
        );
        if self.kind == DirectoryType::LimitedNoBroadcast && self.sharers.len() >= self.max_hw_sharers {
            return false;
        }
        let _ = self.sharers.insert(node);
        true
    }

    /// Removes a sharer, clearing the forwarder if it was that node.
    pub fn remove_sharer(&mut self, node: NodeId) {
        protocol_assert!(
            self.sharers.remove(&node),
            "directory {:#x} ({}): {node} removed but was not a sharer (sharers {:?})",
            self.address,
            self.state,
            self.sharers
        );
        if self.forwarder == Some(node) {
            self.forwarder = None;
        }
    }

    /// Returns `true` if the node is a sharer.
    pub fn has_sharer(&self, node: NodeId) -> bool {
        self.sharers.contains(&node)
    }

    /// Number of sharers.
    pub fn num_sharers(&self) -> usize {
        self.sharers.len()
    }

    /// Sharers in ascending node order.
    pub fn sharers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.sharers.iter().copied()
    }

    /// Picks one sharer other than `exclude`.
    ///
    /// # Arguments
    ///
    /// * `exclude` - Node that must not be returned.
    /// * `seed` - Selects among the candidates (taken modulo their count).
    pub fn one_sharer(&self, exclude: Option<NodeId>, seed: u64) -> Option<NodeId> {
        let candidates: Vec<NodeId> = self.sharers().filter(|&n| Some(n) != exclude).collect();
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[(seed % candidates.len() as u64) as usize])
    }

    /// Returns `true` if invalidations for this entry must go to every node.
    pub fn in_broadcast_mode(&self) -> bool {
        self.kind == DirectoryType::LimitedBroadcast && self.sharers.len() > self.max_hw_sharers
    }

    /// Owner of an `Exclusive` or `Modified` line.
    pub const fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Sets the owner.
    pub const fn set_owner(&mut self, owner: Option<NodeId>) {
        self.owner = owner;
    }

    /// Forwarder of a `Shared` line (MESIF only).
    pub const fn forwarder(&self) -> Option<NodeId> {
        self.forwarder
    }

    /// Sets the forwarder.
    pub const fn set_forwarder(&mut self, forwarder: Option<NodeId>) {
        self.forwarder = forwarder;
    }
}
