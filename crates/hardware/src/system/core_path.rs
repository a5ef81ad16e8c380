//! User path: a core request descending the hierarchy.
//!
//! 1. **First level:** Permission check, hit timing (including overlap with a miss still
//!    completing) and the byte-level read or write.
//! 2. **Inner requests:** `process_from_prev` serves an inner controller's miss, recursing
//!    outward until a level hits, the backing store is read (direct mode) or the last level
//!    has asked the directory.
//! 3. **Retry:** A request that reached the directory returns `HitWhere::Miss`; the caller
//!    pumps the network until the reply wakes it and walks the hierarchy again, which must
//!    now hit.

use tracing::trace;

use super::eviction::Fill;
use super::{AccessResult, MemorySystem, operation_permissible};
use crate::cache::block::BlockOption;
use crate::coherence::{CacheState, HitWhere, Transition};
use crate::common::{CacheId, MemOp, Prefetch, is_line_aligned};
use crate::config::Protocol;

/// A request handed from one controller to the next outer one.
#[derive(Clone, Copy, Debug)]
pub(super) struct MemReq {
    /// Inner controller that missed.
    pub requester: CacheId,
    /// Issuing core.
    pub core: usize,
    pub op: MemOp,
    pub address: u64,
    pub prefetch: Prefetch,
    pub modeled: bool,
    /// Time the request arrives at the receiving controller.
    pub time: u64,
    /// Cleared on the walk that follows a directory reply; counters are only bumped once.
    pub first_attempt: bool,
}

/// What an outer level hands back to the inner one.
#[derive(Debug)]
pub(super) struct FromNext {
    pub hit_where: HitWhere,
    /// Time the data is available to the requester.
    pub time: u64,
    /// One line of bytes; empty on a miss.
    pub data: Box<[u8]>,
}

impl FromNext {
    fn miss(time: u64) -> Self {
        Self {
            hit_where: HitWhere::Miss,
            time,
            data: Box::default(),
        }
    }
}

impl MemorySystem {
    /// Runs one access at a first-level controller.
    pub(super) fn process_mem_op_from_core(
        &mut self,
        l1: CacheId,
        core: usize,
        op: MemOp,
        address: u64,
        offset: usize,
        data: &mut [u8],
        modeled: bool,
    ) -> AccessResult {
        protocol_assert!(
            is_line_aligned(address, self.line_size),
            "{}: {op} to unaligned address {address:#x}",
            self.cntlrs[l1.0].name()
        );
        let t_start = self.cores[core].time;
        self.ensure_perfect_line(l1, address, modeled);

        let c = &mut self.cntlrs[l1.0];
        let state = c.cache.state(address);
        let hit = c.perfect || operation_permissible(state, op);
        if modeled {
            c.count_access(op, state, hit);
        }

        let mut t = t_start;
        let hit_where = if hit {
            let level = c.level;
            let wait = c
                .mshr
                .overlap(address, t)
                .or_else(|| c.outstanding.tag_completion(address).filter(|&done| done > t).map(|done| done - t));
            if let Some(wait) = wait {
                c.stats.overlapping += 1;
                c.stats.mshr_latency += wait;
                t += wait;
            }
            trace!(cache = c.name(), address = format_args!("{address:#x}"), %op, %state, "hit");
            HitWhere::Cache(level)
        } else {
            trace!(cache = c.name(), address = format_args!("{address:#x}"), %op, %state, "miss");
            t += c.tags_latency;
            let t_miss = c.outstanding.start_time(t);
            let Some(next) = c.next else {
                protocol_fail!("{}: miss on {address:#x} with no next level", c.name())
            };
            if state.readable() {
                // Shared copy, write requested: the next level performs the upgrade.
                c.stats.record_transition(Transition::Upgrade, state, CacheState::Invalid);
                self.invalidate_line(l1, address);
            }

            let mut req = MemReq {
                requester: l1,
                core,
                op,
                address,
                prefetch: Prefetch::None,
                modeled,
                time: t_miss,
                first_attempt: true,
            };
            let reply = self.fetch_from_next(next, &mut req);

            let fill_state = if op.needs_write() {
                CacheState::Modified
            } else {
                CacheState::Shared
            };
            let fill = Fill {
                state: fill_state,
                reason: core_reason(op),
                core: Some(core),
                modeled,
                prefetch: Prefetch::None,
                time: reply.time,
            };
            let t_fill = reply.time + self.insert_line(l1, address, fill, &reply.data);
            let c = &mut self.cntlrs[l1.0];
            c.outstanding.record(t_miss, t_fill, address);
            c.mshr.insert(address, t_miss, t_fill);
            t = t_fill;
            reply.hit_where
        };

        let c = &mut self.cntlrs[l1.0];
        t += c.data_latency;
        self.access_cache(l1, op, address, offset, data, modeled);
        let latency = t - t_start;
        self.cntlrs[l1.0].stats.total_latency += latency;
        if modeled {
            self.cores[core].time = t;
        }
        AccessResult { hit_where, latency }
    }

    /// Installs a line in a prefetch target and tags it as prefetched.
    pub(super) fn process_prefetch(&mut self, target: CacheId, core: usize, address: u64) -> AccessResult {
        let t_start = self.cores[core].time;
        let c = &mut self.cntlrs[target.0];
        if c.cache.state(address).readable() {
            return AccessResult {
                hit_where: HitWhere::Cache(c.level),
                latency: 0,
            };
        }
        c.stats.prefetches += 1;

        let mut req = MemReq {
            requester: target,
            core,
            op: MemOp::Read,
            address,
            prefetch: Prefetch::Own,
            modeled: true,
            time: t_start,
            first_attempt: true,
        };
        let mut reply = self.fetch_line(target, &req);
        if reply.hit_where == HitWhere::Miss {
            req.time = self.wait_for_network(self.last_level(target), address);
            req.first_attempt = false;
            reply = if self.cntlrs[target.0].cache.state(address).readable() {
                let c = &mut self.cntlrs[target.0];
                FromNext {
                    hit_where: c.last_remote_hit_where.take().unwrap_or(HitWhere::Remote),
                    time: req.time,
                    data: Box::default(),
                }
            } else {
                self.fetch_line(target, &req)
            };
            protocol_assert!(
                reply.hit_where != HitWhere::Miss,
                "{}: prefetch of {address:#x} still misses after the directory replied",
                self.cntlrs[target.0].name()
            );
        }
        AccessResult {
            hit_where: reply.hit_where,
            latency: reply.time.saturating_sub(t_start),
        }
    }

    /// Sends a request to the next level, waiting on the directory and walking again if needed.
    fn fetch_from_next(&mut self, next: CacheId, req: &mut MemReq) -> FromNext {
        let reply = self.process_from_prev(next, req);
        if reply.hit_where != HitWhere::Miss {
            return reply;
        }
        req.time = self.wait_for_network(self.last_level(next), req.address);
        req.first_attempt = false;
        let reply = self.process_from_prev(next, req);
        protocol_assert!(
            reply.hit_where != HitWhere::Miss,
            "{}: {} of {:#x} still misses after the directory replied",
            self.cntlrs[next.0].name(),
            req.op,
            req.address
        );
        reply
    }

    /// Serves a miss from an inner controller.
    pub(super) fn process_from_prev(&mut self, cid: CacheId, req: &MemReq) -> FromNext {
        let address = req.address;
        self.ensure_perfect_line(cid, address, req.modeled);

        let c = &mut self.cntlrs[cid.0];
        let state = c.cache.state(address);
        let hit = c.perfect || operation_permissible(state, req.op);
        if req.first_attempt && req.modeled {
            c.count_access(req.op, state, hit);
        }
        if !hit {
            trace!(cache = c.name(), address = format_args!("{address:#x}"), op = %req.op, %state, "miss");
            let mut reply = self.fetch_line(cid, req);
            if reply.hit_where != HitWhere::Miss {
                self.cntlrs[cid.0].stats.total_latency += reply.time - req.time;
                reply.data = self.line_copy(cid, address);
            }
            return reply;
        }

        trace!(cache = c.name(), address = format_args!("{address:#x}"), op = %req.op, %state, "hit");
        let mut t = req.time + c.data_latency;
        // A hit on a line whose directory fill is still in flight waits for it.
        if let Some(wait) = c.mshr.overlap(address, req.time) {
            c.stats.overlapping += 1;
            c.stats.mshr_latency += wait;
            t += wait;
        }
        let requester_bit = c.prev_index(req.requester).map_or(0, |i| 1u64 << i);
        let mut sibling_dirty = false;

        if req.op.needs_write() {
            if state == CacheState::Exclusive {
                let _ = c.cache.set_state(address, CacheState::Modified);
                c.stats.silent_upgrades += 1;
                c.stats.record_transition(core_reason(req.op), state, CacheState::Modified);
            }
            let update = self.update_prevs(cid, address, CacheState::Invalid, Transition::Coherency, requester_bit);
            t += update.latency;
            sibling_dirty = update.dirty;
            let c = &self.cntlrs[cid.0];
            let locs = c.cache.peek(address).map_or(0, |b| b.cached_locs());
            protocol_assert!(
                locs & !requester_bit == 0,
                "{}: {address:#x} still cached by inner levels {locs:#b} after a write by {}",
                c.name(),
                self.cntlrs[req.requester.0].name()
            );
        } else if state == CacheState::Modified {
            let update = self.update_prevs(cid, address, CacheState::Shared, Transition::Coherency, requester_bit);
            t += update.latency;
            sibling_dirty = update.dirty;
        }

        self.note_demand_hit(cid, address, req.prefetch, req.modeled);
        let c = &mut self.cntlrs[cid.0];
        let _ = c.cache.touch(address);
        let level = c.level;
        let hit_where = match c.last_remote_hit_where.take() {
            Some(remote) => remote,
            None if sibling_dirty => HitWhere::Sibling(level),
            None => HitWhere::Cache(level),
        };
        c.stats.total_latency += t - req.time;
        FromNext {
            hit_where,
            time: t,
            data: self.line_copy(cid, address),
        }
    }

    /// Brings a line this controller does not hold with enough permission.
    ///
    /// Returns `HitWhere::Miss` once the last level has asked the directory.
    fn fetch_line(&mut self, cid: CacheId, req: &MemReq) -> FromNext {
        let address = req.address;
        let c = &mut self.cntlrs[cid.0];
        let state = c.cache.state(address);
        let mut t = req.time + c.tags_latency;

        if state.readable() && req.op.needs_write() {
            let update = self.update_prevs(cid, address, CacheState::Invalid, Transition::Upgrade, 0);
            t += update.latency;
        }

        let c = &mut self.cntlrs[cid.0];
        if let Some(next) = c.next {
            if state.readable() {
                c.stats.record_transition(Transition::Upgrade, state, CacheState::Invalid);
                self.invalidate_line(cid, address);
            }
            let mut fwd = MemReq {
                requester: cid,
                prefetch: req.prefetch.forwarded(),
                time: t,
                ..*req
            };
            let reply = self.fetch_from_next(next, &mut fwd);
            let fill = Fill {
                state: if req.op.needs_write() {
                    CacheState::Modified
                } else {
                    CacheState::Shared
                },
                reason: core_reason(req.op),
                core: Some(req.core),
                modeled: req.modeled,
                prefetch: req.prefetch,
                time: reply.time,
            };
            let latency = self.insert_line(cid, address, fill, &reply.data);
            let t_done = reply.time + latency + self.cntlrs[cid.0].data_latency;
            return FromNext {
                hit_where: reply.hit_where,
                time: t_done,
                data: Box::default(),
            };
        }

        if self.is_direct_dram() {
            return self.fetch_from_dram(cid, req, state, t);
        }

        self.initiate_directory_access(cid, req, t);
        FromNext::miss(t)
    }

    /// Last level without a directory: the backing store is the only other copy.
    fn fetch_from_dram(&mut self, cid: CacheId, req: &MemReq, state: CacheState, t: u64) -> FromNext {
        let address = req.address;
        let c = &mut self.cntlrs[cid.0];
        if state == CacheState::Shared && req.op.needs_write() {
            let _ = c.cache.set_state(address, CacheState::Modified);
            c.stats.silent_upgrades += 1;
            c.stats.record_transition(Transition::Upgrade, state, CacheState::Modified);
            return FromNext {
                hit_where: HitWhere::Cache(c.level),
                time: t + c.data_latency,
                data: Box::default(),
            };
        }

        let mut buf = vec![0; self.line_size].into_boxed_slice();
        let access = self.dram.read(address, &mut buf);
        let fill_state = match (req.op.needs_write(), self.protocol) {
            (true, _) => CacheState::Modified,
            (false, Protocol::Msi) => CacheState::Shared,
            (false, _) => CacheState::Exclusive,
        };
        let t_data = t + access.latency;
        let fill = Fill {
            state: fill_state,
            reason: core_reason(req.op),
            core: Some(req.core),
            modeled: req.modeled,
            prefetch: req.prefetch,
            time: t_data,
        };
        let latency = self.insert_line(cid, address, fill, &buf);
        FromNext {
            hit_where: access.hit_where,
            time: t_data + latency + self.cntlrs[cid.0].data_latency,
            data: Box::default(),
        }
    }

    /// Byte-level read or write on a first-level line that is known to permit it.
    fn access_cache(&mut self, cid: CacheId, op: MemOp, address: u64, offset: usize, data: &mut [u8], modeled: bool) {
        self.note_demand_hit(cid, address, Prefetch::None, modeled);
        let c = &mut self.cntlrs[cid.0];
        let state = c.cache.state(address);
        protocol_assert!(
            c.perfect || operation_permissible(state, op),
            "{}: {op} on {address:#x} finds the line {state} right after it was filled",
            c.name()
        );
        let present = match op {
            MemOp::Read | MemOp::ReadEx => c.cache.read(address, offset, data, true),
            MemOp::Write => {
                if state == CacheState::Exclusive {
                    let _ = c.cache.set_state(address, CacheState::Modified);
                    c.stats.silent_upgrades += 1;
                    c.stats.record_transition(Transition::CoreWr, state, CacheState::Modified);
                }
                c.cache.write(address, offset, data, true)
            }
        };
        protocol_assert!(present, "{}: {address:#x} vanished before {op}", c.name());
        if let Some(block) = c.cache.peek_mut(address) {
            block.mark_used(offset, data.len());
        }
    }

    /// Clears prefetch and warmup tags on the first demand hit and counts it.
    fn note_demand_hit(&mut self, cid: CacheId, address: u64, prefetch: Prefetch, modeled: bool) {
        let c = &mut self.cntlrs[cid.0];
        let Some(block) = c.cache.peek_mut(address) else {
            return;
        };
        if !prefetch.is_prefetch() && block.has_option(BlockOption::Prefetch) {
            block.clear_option(BlockOption::Prefetch);
            c.stats.hits_prefetch += 1;
        }
        if modeled && block.has_option(BlockOption::Warmup) {
            block.clear_option(BlockOption::Warmup);
            c.stats.hits_warmup += 1;
        }
    }

    /// Perfect caches install missing lines from the backing store without timing.
    fn ensure_perfect_line(&mut self, cid: CacheId, address: u64, modeled: bool) {
        let c = &self.cntlrs[cid.0];
        if !c.perfect || c.cache.state(address).readable() {
            return;
        }
        let mut buf = vec![0; self.line_size];
        let _ = self.dram.read(address, &mut buf);
        let fill = Fill {
            state: CacheState::Modified,
            reason: Transition::CoreRd,
            core: None,
            modeled,
            prefetch: Prefetch::None,
            time: 0,
        };
        let _ = self.insert_line(cid, address, fill, &buf);
    }

    fn line_copy(&self, cid: CacheId, address: u64) -> Box<[u8]> {
        self.cntlrs[cid.0]
            .cache
            .line_data(address)
            .map_or_else(Box::default, Box::from)
    }

    /// Last-level controller reached from `cid`.
    pub(super) fn last_level(&self, mut cid: CacheId) -> CacheId {
        while let Some(next) = self.cntlrs[cid.0].next {
            cid = next;
        }
        cid
    }
}

const fn core_reason(op: MemOp) -> Transition {
    match op {
        MemOp::Read => Transition::CoreRd,
        MemOp::ReadEx => Transition::CoreRdEx,
        MemOp::Write => Transition::CoreWr,
    }
}
