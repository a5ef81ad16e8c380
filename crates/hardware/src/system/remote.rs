//! Last-level side of the directory protocol.
//!
//! 1. **Requests:** A last-level miss parks a waiter and sends EX_REQ, SH_REQ or UPGRADE_REQ;
//!    later misses on the same line only queue behind the first.
//! 2. **Replies:** EX_REP / SH_REP fill the line, UPGRADE_REP promotes it; each wakes the
//!    waiters that the new state satisfies.
//! 3. **Demands:** INV_REQ, FLUSH_REQ and WB_REQ weaken the line (and its inner copies) and are
//!    acknowledged. A demand for a line this node already evicted needs no reply: the eviction
//!    notice is the acknowledgement.
//! 4. **Pump:** Messages are delivered in order until the awaited reply arrives (`wait_for_network`)
//!    or nothing is left in flight (`drain`).

use tracing::debug;

use super::core_path::MemReq;
use super::eviction::Fill;
use super::{DirectoryWaiter, MemorySystem, Wakeup};
use crate::coherence::{CacheState, Endpoint, HitWhere, MsgType, ShmemMsg, Transition};
use crate::common::{CacheId, NodeId};
use crate::directory::DirCtx;

impl MemorySystem {
    /// Parks a last-level miss and asks the directory, unless a request for the line is already out.
    pub(super) fn initiate_directory_access(&mut self, cid: CacheId, req: &MemReq, time: u64) {
        let waiter = DirectoryWaiter {
            exclusive: req.op.needs_write(),
            prefetch: req.prefetch,
            modeled: req.modeled,
            core: Some(req.core),
            t_issue: time,
        };
        if self.cntlrs[cid.0].waiters.enqueue(req.address, waiter) > 1 {
            return;
        }
        self.send_directory_request(cid, req.address, waiter, time);
    }

    fn send_directory_request(&mut self, cid: CacheId, address: u64, waiter: DirectoryWaiter, time: u64) {
        let home = self.home_endpoint(address);
        let c = &mut self.cntlrs[cid.0];
        let Some(node) = c.node else {
            protocol_fail!("{}: directory request from a cache that is not a last level", c.name())
        };
        let state = c.cache.state(address);
        let msg_type = match (waiter.exclusive, state) {
            (true, CacheState::Shared) => {
                let _ = c.cache.set_state(address, CacheState::SharedUpgrading);
                c.stats.record_transition(Transition::Upgrade, state, CacheState::SharedUpgrading);
                MsgType::UpgradeReq
            }
            (true, CacheState::Invalid) => MsgType::ExReq,
            (false, CacheState::Invalid) => MsgType::ShReq,
            (exclusive, state) => protocol_fail!(
                "{}: directory request for {address:#x} (exclusive: {exclusive}) with line in {state}",
                c.name()
            ),
        };
        debug!(target: "cohsim::cache", "{}: {msg_type} {address:#x} to dir{home} @{time}", c.name());
        self.network.send(
            ShmemMsg::new(msg_type, Endpoint::Cache(node), Endpoint::Directory(home), node, address, time)
                .with_prefetch(waiter.prefetch.is_prefetch()),
        );
    }

    /// Handles one message from a directory at a last-level controller.
    pub(super) fn handle_msg_from_directory(&mut self, cid: CacheId, msg: ShmemMsg) {
        let address = msg.address;
        debug!(
            target: "cohsim::cache",
            "{} <- {} {address:#x} from {} @{}",
            self.cntlrs[cid.0].name(),
            msg.msg_type,
            msg.sender,
            msg.time
        );
        match msg.msg_type {
            MsgType::ExRep | MsgType::ShRep => self.process_data_reply(cid, &msg),
            MsgType::UpgradeRep => {
                let c = &mut self.cntlrs[cid.0];
                let state = c.cache.state(address);
                protocol_assert!(
                    state == CacheState::SharedUpgrading,
                    "{}: UPGRADE_REP for {address:#x} but the line is {state}",
                    c.name()
                );
                let _ = c.cache.set_state(address, CacheState::Modified);
                c.stats.coherency_upgrades += 1;
                c.stats.record_transition(Transition::Upgrade, state, CacheState::Modified);
                let t = msg.time + c.tags_latency;
                self.wake_waiters(cid, address, msg.hit_where, t);
            }
            MsgType::InvReq => {
                let Some(node) = self.pre_demand(cid, &msg, &[CacheState::Shared, CacheState::SharedUpgrading]) else {
                    return;
                };
                let update = self.update_line(cid, address, CacheState::Invalid, Transition::Coherency, None);
                let t = msg.time + self.cntlrs[cid.0].tags_latency + update.latency;
                self.reply(node, &msg, MsgType::InvRep, t, None);
            }
            MsgType::FlushReq | MsgType::WbReq => {
                let allowed = [
                    CacheState::Shared,
                    CacheState::SharedUpgrading,
                    CacheState::Exclusive,
                    CacheState::Modified,
                ];
                let Some(node) = self.pre_demand(cid, &msg, &allowed) else {
                    return;
                };
                let (target, reply) = if msg.msg_type == MsgType::FlushReq {
                    (CacheState::Invalid, MsgType::FlushRep)
                } else {
                    (CacheState::Shared, MsgType::WbRep)
                };
                let mut buf = vec![0; self.line_size].into_boxed_slice();
                let update = self.update_line(cid, address, target, Transition::Coherency, Some(&mut buf[..]));
                let c = &self.cntlrs[cid.0];
                let t = msg.time + c.tags_latency + c.data_latency + update.latency;
                self.reply(node, &msg, reply, t, Some((buf, update.dirty)));
            }
            other => protocol_fail!(
                "{}: unexpected {other} for {address:#x} from {}",
                self.cntlrs[cid.0].name(),
                msg.sender
            ),
        }
    }

    fn process_data_reply(&mut self, cid: CacheId, msg: &ShmemMsg) {
        let address = msg.address;
        let c = &self.cntlrs[cid.0];
        let Some(waiter) = c.waiters.front(address).copied() else {
            protocol_fail!("{}: {} for {address:#x} with no request waiting", c.name(), msg.msg_type)
        };
        let Some(data) = msg.data.as_deref() else {
            protocol_fail!("{}: {} for {address:#x} carries no data", c.name(), msg.msg_type)
        };
        if c.cache.state(address) == CacheState::SharedUpgrading {
            // Upgrade served as an exclusive request; the fresh line replaces the old copy.
            let _ = self.cntlrs[cid.0].cache.set_state(address, CacheState::Shared);
            let _ = self.update_line(cid, address, CacheState::Invalid, Transition::Upgrade, None);
        }
        let state = match (msg.msg_type, waiter.exclusive) {
            (MsgType::ExRep, true) => CacheState::Modified,
            (MsgType::ExRep, false) => CacheState::Exclusive,
            _ => CacheState::Shared,
        };
        let fill = Fill {
            state,
            reason: if waiter.exclusive {
                Transition::CoreWr
            } else {
                Transition::CoreRd
            },
            core: waiter.core,
            modeled: waiter.modeled,
            prefetch: waiter.prefetch,
            time: msg.time,
        };
        let latency = self.insert_line(cid, address, fill, data);
        let t = msg.time + latency + self.cntlrs[cid.0].data_latency;
        self.wake_waiters(cid, address, msg.hit_where, t);
    }

    /// Common checks before a forwarded demand.
    ///
    /// # Returns
    ///
    /// The node to acknowledge as, or `None` when the line was already evicted.
    fn pre_demand(&self, cid: CacheId, msg: &ShmemMsg, allowed: &[CacheState]) -> Option<NodeId> {
        let c = &self.cntlrs[cid.0];
        let state = c.cache.state(msg.address);
        if state == CacheState::Invalid {
            debug!(
                target: "cohsim::cache",
                "{}: {} for {:#x} after eviction, the eviction notice answers it",
                c.name(),
                msg.msg_type,
                msg.address
            );
            return None;
        }
        protocol_assert!(
            allowed.contains(&state),
            "{}: {} for {:#x} with the line in {state}",
            c.name(),
            msg.msg_type,
            msg.address
        );
        match c.node {
            Some(node) => Some(node),
            None => protocol_fail!("{}: {} received by a cache that is not a last level", c.name(), msg.msg_type),
        }
    }

    fn reply(&mut self, node: NodeId, msg: &ShmemMsg, reply: MsgType, time: u64, data: Option<(Box<[u8]>, bool)>) {
        let mut out = ShmemMsg::new(reply, Endpoint::Cache(node), msg.sender, msg.requester, msg.address, time)
            .with_prefetch(msg.is_prefetch);
        if let Some((data, dirty)) = data {
            out = out.with_data(data, dirty);
        }
        self.network.send(out);
    }

    /// Releases the waiters a fresh fill or upgrade satisfies.
    ///
    /// An exclusive waiter behind a shared fill asks the directory again and stays parked.
    fn wake_waiters(&mut self, cid: CacheId, address: u64, hit_where: HitWhere, time: u64) {
        loop {
            let c = &mut self.cntlrs[cid.0];
            let Some(&waiter) = c.waiters.front(address) else {
                return;
            };
            if waiter.exclusive && !c.cache.state(address).writable() {
                self.send_directory_request(cid, address, waiter, time);
                return;
            }
            let _ = c.waiters.dequeue(address);
            c.last_remote_hit_where = Some(hit_where);
            c.mshr.insert(address, waiter.t_issue, time);
            c.stats.snoop_latency += time.saturating_sub(waiter.t_issue);
            self.wakeups.push(Wakeup {
                cache: cid,
                address,
                time,
            });
        }
    }

    fn deliver(&mut self, msg: ShmemMsg) {
        match msg.receiver {
            Endpoint::Directory(home) => {
                let Some(dir) = self.directories.get_mut(home) else {
                    protocol_fail!("{} for {:#x} sent to missing dir{home}", msg.msg_type, msg.address)
                };
                let mut ctx = DirCtx {
                    net: &mut self.network,
                    dram: &mut *self.dram,
                };
                dir.handle_msg(msg, &mut ctx);
            }
            Endpoint::Cache(node) => {
                let Some(&cid) = self.nodes.get(node.0) else {
                    protocol_fail!("{} for {:#x} sent to missing {node}", msg.msg_type, msg.address)
                };
                self.handle_msg_from_directory(cid, msg);
            }
        }
    }

    /// Delivers messages until the reply for a line parked at `llc` has arrived.
    ///
    /// # Returns
    ///
    /// The time the waiting request may continue.
    pub(super) fn wait_for_network(&mut self, llc: CacheId, address: u64) -> u64 {
        loop {
            if let Some(pos) = self
                .wakeups
                .iter()
                .position(|w| w.cache == llc && w.address == address)
            {
                return self.wakeups.swap_remove(pos).time;
            }
            let Some(msg) = self.network.pop() else {
                protocol_fail!(
                    "{}: waiting on {address:#x} but no message is in flight",
                    self.cntlrs[llc.0].name()
                )
            };
            self.deliver(msg);
        }
    }

    /// Delivers every message in flight.
    pub(super) fn drain(&mut self) {
        while let Some(msg) = self.network.pop() {
            self.deliver(msg);
        }
        self.wakeups.clear();
    }
}
