//! Insertion, eviction and forced state changes.
//!
//! 1. **Insertion:** `insert_line` installs a fetched line and runs the eviction protocol for
//!    whatever it displaced.
//! 2. **Eviction:** Inner copies of the victim are invalidated first (their dirty bytes land in
//!    the eviction buffer), then the line is written to the next level, to the backing store
//!    or announced to the directory.
//! 3. **Forced updates:** `update_line` weakens a line top-down on behalf of the directory or
//!    an outer level, draining dirty data before the state drops.
//! 4. **Presence tracking:** Outer lines keep a bitmask of the inner controllers holding a copy.

use tracing::debug;

use super::MemorySystem;
use crate::cache::Evicted;
use crate::cache::block::{BlockOption, CacheBlockInfo};
use crate::coherence::{CacheState, Endpoint, MsgType, ShmemMsg, Transition};
use crate::common::{CacheId, Prefetch};

/// How a line is being installed.
#[derive(Clone, Copy, Debug)]
pub(super) struct Fill {
    pub state: CacheState,
    pub reason: Transition,
    /// Core the line is installed for, kept for telemetry.
    pub core: Option<usize>,
    pub modeled: bool,
    pub prefetch: Prefetch,
    pub time: u64,
}

/// Outcome of forcing a line (and its inner copies) to a weaker state.
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct UpdateResult {
    /// Cycles spent writing dirty data outward.
    pub latency: u64,
    /// The line or one of its inner copies held dirty data.
    pub dirty: bool,
}

/// Reason recorded one level further in.
const fn deeper(reason: Transition) -> Transition {
    match reason {
        Transition::BackInval => Transition::EvictLower,
        other => other,
    }
}

impl MemorySystem {
    /// Installs a line and disposes of any victim.
    ///
    /// # Arguments
    ///
    /// * `cid` - Controller receiving the line; it must not hold the line already.
    /// * `address` - Line address.
    /// * `fill` - Initial state and tagging.
    /// * `data` - One line of bytes.
    ///
    /// # Returns
    ///
    /// Extra cycles charged for writing a dirty victim to the next level.
    pub(super) fn insert_line(&mut self, cid: CacheId, address: u64, fill: Fill, data: &[u8]) -> u64 {
        let c = &mut self.cntlrs[cid.0];
        let old = c.cache.state(address);
        protocol_assert!(
            old == CacheState::Invalid,
            "{}: inserting {address:#x} as {} but it is already {old}",
            c.name(),
            fill.state
        );
        let evicted = c.cache.insert(address, fill.state, Some(data));
        if let Some(block) = c.cache.peek_mut(address) {
            block.set_owner(fill.core);
            if !fill.modeled {
                block.set_option(BlockOption::Warmup);
            }
            if fill.prefetch == Prefetch::Own {
                block.set_option(BlockOption::Prefetch);
            }
        }
        c.stats.record_transition(fill.reason, CacheState::Invalid, fill.state);
        debug!(
            target: "cohsim::cache",
            "{}: insert {address:#x} as {} @{}",
            c.name(),
            fill.state,
            fill.time
        );
        if let (Some(next), false) = (c.next, c.perfect) {
            self.notify_prev_level_insert(next, cid, address);
        }
        evicted.map_or(0, |victim| self.evict_line(cid, victim, fill.time))
    }

    /// Runs the eviction protocol for a displaced line.
    fn evict_line(&mut self, cid: CacheId, victim: Evicted, time: u64) -> u64 {
        let address = victim.info.address();
        let state = victim.info.state();
        let direct = self.is_direct_dram();
        let home = self.home_endpoint(address);
        self.cntlrs[cid.0].evicting = Some((address, victim.data));

        let update = self.update_prevs_of_block(cid, &victim.info, CacheState::Invalid, Transition::BackInval);
        let mut latency = update.latency;

        let c = &mut self.cntlrs[cid.0];
        let data = match c.evicting.take() {
            Some((_, data)) => data,
            None => protocol_fail!("{}: eviction buffer for {address:#x} disappeared", c.name()),
        };
        c.stats.evictions += 1;
        c.stats.words_used += u64::from(victim.info.used_words());
        if victim.info.has_option(BlockOption::Prefetch) {
            c.stats.evict_prefetch += 1;
        }
        match state {
            CacheState::Modified => c.stats.evict_modified += 1,
            CacheState::Shared => c.stats.evict_shared += 1,
            _ => {}
        }
        c.stats.record_transition(Transition::Evict, state, CacheState::Invalid);
        debug!(target: "cohsim::cache", "{}: evict {address:#x} ({state}) @{time}", c.name());

        if c.perfect {
            if state.is_dirty() {
                let _ = self.dram.write(address, &data);
            }
            return latency;
        }
        if !c.coherent {
            protocol_assert!(
                !state.is_dirty(),
                "{}: MODIFIED data for {address:#x} discarded by a non-coherent cache",
                c.name()
            );
            if let Some(next) = c.next {
                self.notify_prev_level_evict(next, cid, address);
            }
            return latency;
        }

        if let Some(next) = c.next {
            if state.is_dirty() {
                latency += c.writeback_latency;
                self.write_block(next, address, &data);
            }
            self.notify_prev_level_evict(next, cid, address);
        } else if direct {
            if state.is_dirty() {
                latency += self.dram.write(address, &data);
            }
        } else {
            let Some(node) = c.node else {
                protocol_fail!("{}: last-level cache without a network identity", c.name())
            };
            let (msg_type, payload) = if state.is_dirty() {
                (MsgType::FlushRep, Some(data))
            } else {
                (MsgType::InvRep, None)
            };
            let mut msg = ShmemMsg::new(msg_type, Endpoint::Cache(node), Endpoint::Directory(home), node, address, time);
            if let Some(payload) = payload {
                msg = msg.with_data(payload, true);
            }
            self.network.send(msg);
        }
        latency
    }

    /// Forces a line, and every inner copy of it, to `target` (`Shared` or `Invalid`).
    ///
    /// # Arguments
    ///
    /// * `cid` - Controller whose line is weakened.
    /// * `address` - Line address.
    /// * `target` - New state.
    /// * `reason` - Transition reason recorded at this level.
    /// * `out` - Receives the newest bytes of the line, if given. Dirty data goes here instead
    ///   of the next level.
    ///
    /// # Returns
    ///
    /// The write-back latency and whether dirty data was found.
    pub(super) fn update_line(
        &mut self,
        cid: CacheId,
        address: u64,
        target: CacheState,
        reason: Transition,
        out: Option<&mut [u8]>,
    ) -> UpdateResult {
        let Some(block) = self.cntlrs[cid.0].cache.peek(address).cloned() else {
            return UpdateResult::default();
        };
        let mut result = self.update_prevs_of_block(cid, &block, target, deeper(reason));

        let c = &mut self.cntlrs[cid.0];
        let state = block.state();
        let new_state = match (target, state) {
            (CacheState::Invalid, _) => CacheState::Invalid,
            (CacheState::Shared, CacheState::SharedUpgrading) => CacheState::SharedUpgrading,
            (CacheState::Shared, _) => CacheState::Shared,
            (other, _) => protocol_fail!("{}: cannot upgrade {address:#x} from {state} to {other}", c.name()),
        };

        let has_out = out.is_some();
        if let (Some(buf), Some(line)) = (out, c.cache.line_data(address)) {
            buf.copy_from_slice(line);
        }
        if state.is_dirty() {
            result.dirty = true;
            if !has_out {
                let Some(next) = c.next else {
                    protocol_fail!("{}: MODIFIED data for {address:#x} is about to get lost", c.name())
                };
                result.latency += c.writeback_latency;
                let line = self.line_bytes(cid, address);
                self.write_block(next, address, &line);
            }
        }

        let c = &mut self.cntlrs[cid.0];
        match reason {
            Transition::BackInval | Transition::EvictLower => c.stats.back_invalidates += 1,
            Transition::Coherency => {
                if new_state == CacheState::Invalid {
                    c.stats.coherency_invalidates += 1;
                } else if state != new_state {
                    c.stats.coherency_downgrades += 1;
                }
                if state.is_dirty() {
                    c.stats.coherency_writebacks += 1;
                }
            }
            _ => {}
        }
        if state != new_state {
            c.stats.record_transition(reason, state, new_state);
        }
        debug!(
            target: "cohsim::cache",
            "{}: update {address:#x} {state} -> {new_state} ({})",
            c.name(),
            reason.name()
        );

        if new_state == CacheState::Invalid {
            let _ = c.cache.set_state(address, CacheState::Shared);
            self.invalidate_line(cid, address);
        } else {
            let _ = c.cache.set_state(address, new_state);
        }
        result
    }

    /// Forces every inner copy of a line to `target`, skipping the inner controllers in `exclude`.
    pub(super) fn update_prevs(
        &mut self,
        cid: CacheId,
        address: u64,
        target: CacheState,
        reason: Transition,
        exclude: u64,
    ) -> UpdateResult {
        let locs = self.cntlrs[cid.0]
            .cache
            .peek(address)
            .map_or(0, |b| b.cached_locs())
            & !exclude;
        self.update_prevs_in(cid, address, locs, target, reason)
    }

    fn update_prevs_of_block(
        &mut self,
        cid: CacheId,
        block: &CacheBlockInfo,
        target: CacheState,
        reason: Transition,
    ) -> UpdateResult {
        self.update_prevs_in(cid, block.address(), block.cached_locs(), target, reason)
    }

    fn update_prevs_in(&mut self, cid: CacheId, address: u64, locs: u64, target: CacheState, reason: Transition) -> UpdateResult {
        let mut result = UpdateResult::default();
        for i in 0..self.cntlrs[cid.0].prev.len() {
            if locs & (1 << i) == 0 {
                continue;
            }
            let prev = self.cntlrs[cid.0].prev[i];
            let inner = self.update_line(prev, address, target, reason, None);
            result.latency = result.latency.max(inner.latency);
            result.dirty |= inner.dirty;
        }
        result
    }

    /// Accepts dirty bytes from an inner level.
    ///
    /// The bytes go to the eviction buffer when the line is the one being evicted here;
    /// otherwise the line must be present and MODIFIED.
    pub(super) fn write_block(&mut self, cid: CacheId, address: u64, data: &[u8]) {
        let c = &mut self.cntlrs[cid.0];
        if let Some((evicting, buf)) = c.evicting.as_mut() {
            if *evicting == address {
                buf.copy_from_slice(data);
                return;
            }
        }
        let state = c.cache.state(address);
        protocol_assert!(
            state == CacheState::Modified,
            "{}: dirty write-back of {address:#x} into a {state} line",
            c.name()
        );
        let _ = c.cache.write(address, 0, data, false);
    }

    /// Drops a clean line and tells the next level.
    pub(super) fn invalidate_line(&mut self, cid: CacheId, address: u64) {
        let c = &mut self.cntlrs[cid.0];
        let state = c.cache.state(address);
        protocol_assert!(
            state.readable() && !state.is_dirty(),
            "{}: invalidating {address:#x} in state {state}",
            c.name()
        );
        let _ = c.cache.invalidate(address);
        if let Some(next) = c.next {
            self.notify_prev_level_evict(next, cid, address);
        }
    }

    fn notify_prev_level_insert(&mut self, cid: CacheId, prev: CacheId, address: u64) {
        let c = &mut self.cntlrs[cid.0];
        let Some(index) = c.prev_index(prev) else {
            protocol_fail!("{}: {prev} is not an inner level", c.name())
        };
        if c.perfect && c.cache.peek(address).is_none() {
            return;
        }
        let Some(block) = c.cache.peek_mut(address) else {
            protocol_fail!("{}: inner level filled {address:#x} which is not cached here", c.name())
        };
        block.set_cached_loc(index);
    }

    fn notify_prev_level_evict(&mut self, cid: CacheId, prev: CacheId, address: u64) {
        let c = &mut self.cntlrs[cid.0];
        if let (Some(index), Some(block)) = (c.prev_index(prev), c.cache.peek_mut(address)) {
            block.clear_cached_loc(index);
        }
    }

    fn line_bytes(&self, cid: CacheId, address: u64) -> Vec<u8> {
        self.cntlrs[cid.0]
            .cache
            .line_data(address)
            .map_or_else(Vec::new, <[u8]>::to_vec)
    }
}
