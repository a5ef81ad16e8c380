//! Global invariant checks on a quiescent system.

use std::collections::BTreeMap;

use super::MemorySystem;
use crate::coherence::{CacheState, DirectoryState};
use crate::common::{CacheId, CoherenceError, NodeId};
use crate::directory::DirectoryEntry;

impl MemorySystem {
    /// Checks the global coherence invariants.
    ///
    /// Only meaningful when nothing is in flight; returns `NotQuiescent` otherwise. Perfect
    /// caches are skipped. Checks, in order, for every line cached at a last level:
    /// 1. **Single writer:** At most one node holds the line EXCLUSIVE or MODIFIED.
    /// 2. **Exclusivity:** A writable copy has no other copies beside it.
    /// 3. **Tracking:** Every holder is listed by the directory and a writer is its owner.
    /// 4. **Freshness:** All SHARED copies hold the same bytes.
    ///
    /// Then that every sharer the directory lists holds a copy, and that every inner line is
    /// also cached by its next level.
    ///
    /// # Returns
    ///
    /// The first violation found.
    pub fn verify_coherence(&self) -> Result<(), CoherenceError> {
        let in_flight = self.network.pending()
            + self.directories.iter().map(|d| d.pending()).sum::<usize>()
            + self.cntlrs.iter().map(|c| c.waiters.total()).sum::<usize>();
        if in_flight > 0 {
            return Err(CoherenceError::NotQuiescent(in_flight));
        }

        let mut holders: BTreeMap<u64, Vec<(NodeId, CacheState, CacheId)>> = BTreeMap::new();
        for (n, &cid) in self.nodes.iter().enumerate() {
            let c = &self.cntlrs[cid.0];
            if c.perfect {
                continue;
            }
            for block in c.cache.valid_lines() {
                holders
                    .entry(block.address())
                    .or_default()
                    .push((NodeId(n), block.state(), cid));
            }
        }

        let direct = self.is_direct_dram();
        for (&address, copies) in &holders {
            let writers: Vec<NodeId> = copies
                .iter()
                .filter(|(_, state, _)| state.writable())
                .map(|&(node, _, _)| node)
                .collect();
            if writers.len() > 1 {
                return Err(CoherenceError::MultipleWriters { address, nodes: writers });
            }
            if let Some(&writer) = writers.first() {
                if let Some(&(other, _, _)) = copies.iter().find(|(node, _, _)| *node != writer) {
                    return Err(CoherenceError::WriterWithSharers { address, writer, other });
                }
            }

            if !direct {
                let entry = self.directory_entry(address);
                let dir_state = entry.map_or(DirectoryState::Uncached, DirectoryEntry::state);
                for &(node, state, _) in copies {
                    if !entry.is_some_and(|e| e.has_sharer(node)) {
                        return Err(CoherenceError::UntrackedSharer {
                            address,
                            node,
                            state,
                            dir_state,
                        });
                    }
                }
                if let Some(&node) = writers.first() {
                    let owner = entry.and_then(DirectoryEntry::owner);
                    if owner != Some(node) {
                        return Err(CoherenceError::OwnerMismatch {
                            address,
                            node,
                            owner,
                            dir_state,
                        });
                    }
                }
            }

            let mut reference: Option<&[u8]> = None;
            for &(node, state, cid) in copies {
                if state != CacheState::Shared {
                    continue;
                }
                let bytes = self.cntlrs[cid.0].cache.line_data(address);
                match (reference, bytes) {
                    (Some(expected), Some(bytes)) if expected != bytes => {
                        return Err(CoherenceError::StaleCopy { address, node });
                    }
                    (None, Some(bytes)) => reference = Some(bytes),
                    _ => {}
                }
            }
        }

        if !direct {
            for entry in self.directories.iter().flat_map(|d| d.entries()) {
                let copies = holders.get(&entry.address());
                for node in entry.sharers() {
                    if !copies.is_some_and(|c| c.iter().any(|&(n, _, _)| n == node)) {
                        return Err(CoherenceError::GhostSharer {
                            address: entry.address(),
                            node,
                        });
                    }
                }
            }
        }

        for c in &self.cntlrs {
            let Some(next) = c.next else {
                continue;
            };
            if c.perfect || self.cntlrs[next.0].perfect {
                continue;
            }
            let outer = &self.cntlrs[next.0].cache;
            if let Some(block) = c.cache.valid_lines().find(|b| outer.peek(b.address()).is_none()) {
                return Err(CoherenceError::Inclusion {
                    address: block.address(),
                    cache: c.name().to_owned(),
                });
            }
        }
        Ok(())
    }
}
