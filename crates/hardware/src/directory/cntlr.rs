//! Directory controller state machine.
//!
//! One controller per home. Requests for a line are queued per address and only the head of
//! a line's queue is ever active. A transaction that has to wait for acknowledgements keeps
//! its progress in its queue record ([`ShmemReq`]); every acknowledgement updates the entry and
//! re-runs the head's case, which either sends nothing new and keeps waiting, or replies and
//! starts the next queued request.
//!
//! Protocol invariants (a named sharer exists, the owner is who we think) are checked with
//! `protocol_assert!` and abort on violation.

use std::fmt;

use tracing::{debug, warn};

use super::cache::DirectoryCache;
use super::entry::DirectoryEntry;
use crate::coherence::{DirectoryState, Endpoint, HitWhere, MsgType, ShmemMsg};
use crate::common::NodeId;
use crate::config::{Config, Protocol};
use crate::dram::BackingStore;
use crate::network::Network;
use crate::req_queue::ReqQueueList;
use crate::stats::DirectoryStats;

/// Kind of a queued directory transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReqKind {
    /// Requester wants a writable copy.
    Exclusive,
    /// Requester wants a readable copy.
    Shared,
    /// Requester wants to promote its shared copy.
    Upgrade,
    /// Internal: drain every copy so the entry can be dropped.
    Nullify,
}

/// A queued directory transaction and its progress.
#[derive(Clone, Debug)]
pub struct ShmemReq {
    /// What is being asked for.
    pub kind: ReqKind,
    /// Node the reply goes to.
    pub requester: NodeId,
    /// Line address.
    pub address: u64,
    /// Accounting time; advanced by every acknowledgement that resumes the transaction.
    pub time: u64,
    /// Issued on behalf of a prefetcher.
    pub is_prefetch: bool,
    /// Forwarding already failed once; go to the backing store.
    pub retry: bool,
    /// Forwarder asked to supply the data, while its answer is outstanding.
    pub forwarding_from: Option<NodeId>,
    /// Invalidation, flush or write-back requests for this transaction have been sent.
    pub invalidations_sent: bool,
    /// Line data handed back by a previous holder.
    pub data: Option<Box<[u8]>>,
}

impl ShmemReq {
    fn new(kind: ReqKind, requester: NodeId, address: u64, time: u64, is_prefetch: bool) -> Self {
        Self {
            kind,
            requester,
            address,
            time,
            is_prefetch,
            retry: false,
            forwarding_from: None,
            invalidations_sent: false,
            data: None,
        }
    }
}

/// What a directory needs from its surroundings while handling one message.
pub struct DirCtx<'a> {
    /// Transport for requests and replies.
    pub net: &'a mut Network,
    /// Backing store for fills and write-backs.
    pub dram: &'a mut dyn BackingStore,
}

impl fmt::Debug for DirCtx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirCtx")
            .field("in_flight", &self.net.pending())
            .finish_non_exhaustive()
    }
}

/// Directory controller of one home.
#[derive(Debug)]
pub struct DirectoryCntlr {
    home: usize,
    line_size: usize,
    protocol: Protocol,
    num_nodes: usize,
    access_latency: u64,
    cache: DirectoryCache,
    queue: ReqQueueList<ShmemReq>,
    stalled: Vec<u64>,
    rng: u64,
    stats: DirectoryStats,
}

impl DirectoryCntlr {
    /// Creates the controller of home `home`.
    pub fn new(home: usize, config: &Config) -> Self {
        let dir = &config.directory;
        let line_size = config.general.line_bytes;
        Self {
            home,
            line_size,
            protocol: dir.protocol,
            num_nodes: config.num_nodes(),
            access_latency: dir.access_latency,
            cache: DirectoryCache::new(
                dir.total_entries,
                dir.associativity,
                line_size,
                dir.homes,
                dir.kind,
                dir.max_hw_sharers,
            ),
            queue: ReqQueueList::new(),
            stalled: Vec::new(),
            rng: 0x2545_f491_4f6c_dd1d ^ (home as u64 + 1),
            stats: DirectoryStats::default(),
        }
    }

    /// This home's network endpoint.
    pub const fn endpoint(&self) -> Endpoint {
        Endpoint::Directory(self.home)
    }

    /// Entry for a line, if the directory tracks it.
    pub fn entry(&self, address: u64) -> Option<&DirectoryEntry> {
        self.cache.get(address)
    }

    /// Every tracked entry.
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> + '_ {
        self.cache.entries()
    }

    /// Requests queued or in progress.
    pub fn pending(&self) -> usize {
        self.queue.total()
    }

    /// Counters.
    pub const fn stats(&self) -> &DirectoryStats {
        &self.stats
    }

    /// Handles one message addressed to this home.
    pub fn handle_msg(&mut self, msg: ShmemMsg, ctx: &mut DirCtx<'_>) {
        let Endpoint::Cache(sender) = msg.sender else {
            protocol_fail!("dir{}: {} from {} (directories do not talk to each other)", self.home, msg.msg_type, msg.sender)
        };
        debug!(
            target: "cohsim::directory",
            "dir{} <- {} {} from {sender} (requester {}) @{}",
            self.home, msg.msg_type, format_args!("{:#x}", msg.address), msg.requester, msg.time
        );
        match msg.msg_type {
            MsgType::ExReq | MsgType::ShReq | MsgType::UpgradeReq => {
                let kind = match msg.msg_type {
                    MsgType::ExReq => {
                        self.stats.ex_reqs += 1;
                        ReqKind::Exclusive
                    }
                    MsgType::ShReq => {
                        self.stats.sh_reqs += 1;
                        ReqKind::Shared
                    }
                    _ => {
                        self.stats.upgrade_reqs += 1;
                        ReqKind::Upgrade
                    }
                };
                let req = ShmemReq::new(kind, msg.requester, msg.address, msg.time, msg.is_prefetch);
                if self.queue.enqueue(msg.address, req) == 1 {
                    self.start_head(msg.address, ctx);
                }
            }
            MsgType::InvRep => self.process_inv_rep(sender, &msg, ctx),
            MsgType::FlushRep => self.process_flush_rep(sender, msg, ctx),
            MsgType::WbRep => self.process_wb_rep(sender, msg, ctx),
            other => protocol_fail!("dir{}: unexpected {other} from {sender} for {:#x}", self.home, msg.address),
        }
    }

    // ══════════════════════════════════════════════════════════
    // Queue management
    // ══════════════════════════════════════════════════════════

    fn start_head(&mut self, address: u64, ctx: &mut DirCtx<'_>) {
        let latency = self.access_latency;
        if let Some(req) = self.queue.front_mut(address) {
            req.time += latency;
        }
        self.run_head(address, ctx);
    }

    fn run_head(&mut self, address: u64, ctx: &mut DirCtx<'_>) {
        let Some(kind) = self.queue.front(address).map(|r| r.kind) else {
            return;
        };
        if kind != ReqKind::Nullify && !self.ensure_entry(address, ctx) {
            self.stats.set_stalls += 1;
            warn!(
                target: "cohsim::directory",
                "dir{}: every entry in the set of {address:#x} is busy, deferring",
                self.home
            );
            self.stalled.push(address);
            return;
        }
        self.dispatch(kind, address, ctx);
    }

    fn dispatch(&mut self, kind: ReqKind, address: u64, ctx: &mut DirCtx<'_>) {
        match kind {
            ReqKind::Exclusive => self.process_ex(address, ctx),
            ReqKind::Shared => self.process_sh(address, ctx),
            ReqKind::Upgrade => self.process_upgrade(address, ctx),
            ReqKind::Nullify => self.process_nullify(address, ctx),
        }
    }

    /// Retires the head of the line's queue and starts the next request, if any.
    fn process_next(&mut self, address: u64, t_done: u64, ctx: &mut DirCtx<'_>) {
        let _ = self.queue.dequeue(address);
        if let Some(next) = self.queue.front_mut(address) {
            next.time = next.time.max(t_done);
            self.start_head(address, ctx);
        }
        if !self.stalled.is_empty() {
            for stalled in std::mem::take(&mut self.stalled) {
                if let Some(req) = self.queue.front_mut(stalled) {
                    req.time = req.time.max(t_done);
                }
                self.run_head(stalled, ctx);
            }
        }
    }

    /// Makes sure the line has an entry, evicting another one if its set is full.
    ///
    /// # Returns
    ///
    /// `false` if every entry of the set has a transaction in progress.
    fn ensure_entry(&mut self, address: u64, ctx: &mut DirCtx<'_>) -> bool {
        if self.cache.get(address).is_some() || self.cache.try_allocate(address) {
            return true;
        }
        let victim = self
            .cache
            .set_entries(address)
            .filter(|e| self.queue.is_empty(e.address()))
            .min_by_key(|e| (e.num_sharers(), e.address()))
            .map(|e| (e.address(), e.state()));
        let Some((victim, state)) = victim else {
            return false;
        };
        self.stats.entry_evictions += 1;
        if state == DirectoryState::Uncached {
            self.cache.invalidate(victim);
            return self.cache.try_allocate(address);
        }

        warn!(
            target: "cohsim::directory",
            "dir{}: evicting entry {victim:#x} ({state}) to make room for {address:#x}",
            self.home
        );
        let (requester, time) = self
            .queue
            .front(address)
            .map_or((NodeId(0), 0), |r| (r.requester, r.time));
        self.cache.replace(victim, address);
        let _ = self
            .queue
            .enqueue(victim, ShmemReq::new(ReqKind::Nullify, requester, victim, time, false));
        self.start_head(victim, ctx);
        true
    }

    // ══════════════════════════════════════════════════════════
    // Sending
    // ══════════════════════════════════════════════════════════

    fn send(&self, ctx: &mut DirCtx<'_>, msg_type: MsgType, to: NodeId, req: &ShmemReq) {
        ctx.net.send(
            ShmemMsg::new(msg_type, self.endpoint(), Endpoint::Cache(to), req.requester, req.address, req.time)
                .with_prefetch(req.is_prefetch),
        );
    }

    fn next_random(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }

    fn head(&self, address: u64) -> ShmemReq {
        match self.queue.front(address) {
            Some(req) => req.clone(),
            None => protocol_fail!("dir{}: no transaction in progress for {address:#x}", self.home),
        }
    }

    fn entry_mut(&mut self, address: u64) -> &mut DirectoryEntry {
        let home = self.home;
        match self.cache.get_mut(address) {
            Some(entry) => entry,
            None => protocol_fail!("dir{home}: no directory entry for {address:#x}"),
        }
    }

    fn mark_sent(&mut self, address: u64) {
        if let Some(req) = self.queue.front_mut(address) {
            req.invalidations_sent = true;
        }
    }

    /// Nodes to invalidate for a line: every node once the entry has overflowed, the sharers otherwise.
    fn invalidation_targets(&self, address: u64) -> (Vec<NodeId>, bool) {
        match self.cache.get(address) {
            Some(entry) if entry.in_broadcast_mode() => ((0..self.num_nodes).map(NodeId).collect(), true),
            Some(entry) => (entry.sharers().collect(), false),
            None => (Vec::new(), false),
        }
    }

    /// Invalidates every sharer except `exclude`, broadcasting if the entry has overflowed.
    fn invalidate_sharers(&mut self, req: &ShmemReq, exclude: Option<NodeId>, ctx: &mut DirCtx<'_>) {
        let (targets, broadcast) = self.invalidation_targets(req.address);
        if broadcast {
            self.stats.broadcasts += 1;
        }
        for node in targets.into_iter().filter(|&n| Some(n) != exclude) {
            self.stats.invalidations += 1;
            self.send(ctx, MsgType::InvReq, node, req);
        }
    }

    /// Replies with the data the head already holds, or with a backing-store read.
    fn retrieve_data_and_reply(&mut self, address: u64, reply: MsgType, ctx: &mut DirCtx<'_>) {
        let Some(head) = self.queue.front_mut(address) else {
            protocol_fail!("dir{}: reply {reply} for {address:#x} without a transaction", self.home)
        };
        let cached = head.data.take();
        let mut req = head.clone();
        let (data, hit_where) = match cached {
            Some(data) => (data, HitWhere::Remote),
            None => {
                let mut buf = vec![0; self.line_size].into_boxed_slice();
                let access = ctx.dram.read(address, &mut buf);
                self.stats.dram_reads += 1;
                req.time += access.latency;
                (buf, access.hit_where)
            }
        };
        debug!(
            target: "cohsim::directory",
            "dir{} -> {reply} {address:#x} to {} from {hit_where} @{}",
            self.home, req.requester, req.time
        );
        ctx.net.send(
            ShmemMsg::new(reply, self.endpoint(), Endpoint::Cache(req.requester), req.requester, address, req.time)
                .with_data(data, false)
                .with_hit_where(hit_where)
                .with_prefetch(req.is_prefetch),
        );
        self.process_next(address, req.time, ctx);
    }

    fn write_back(&mut self, address: u64, data: Option<&[u8]>, ctx: &mut DirCtx<'_>) {
        let Some(data) = data else {
            protocol_fail!("dir{}: dirty reply for {address:#x} carries no data", self.home)
        };
        self.stats.dram_writes += 1;
        // Write latency is not charged to the transaction.
        let _ = ctx.dram.write(address, data);
    }

    // ══════════════════════════════════════════════════════════
    // Requests
    // ══════════════════════════════════════════════════════════

    fn process_ex(&mut self, address: u64, ctx: &mut DirCtx<'_>) {
        let req = self.head(address);
        let entry = self.entry_mut(address);
        match entry.state() {
            DirectoryState::Modified | DirectoryState::Exclusive => {
                let owner = entry.owner();
                protocol_assert!(
                    owner.is_some() && owner != Some(req.requester),
                    "dir: EX_REQ {address:#x} from {} but entry is {} owned by {owner:?}",
                    req.requester,
                    entry.state()
                );
                if let (Some(owner), false) = (owner, req.invalidations_sent) {
                    self.mark_sent(address);
                    self.stats.flushes += 1;
                    self.send(ctx, MsgType::FlushReq, owner, &req);
                }
            }
            DirectoryState::Shared => {
                protocol_assert!(
                    !entry.has_sharer(req.requester),
                    "dir: EX_REQ {address:#x} from {} which is still a sharer",
                    req.requester
                );
                if !req.invalidations_sent {
                    self.mark_sent(address);
                    self.invalidate_sharers(&req, None, ctx);
                }
            }
            DirectoryState::Uncached => {
                let added = entry.add_sharer(req.requester);
                protocol_assert!(added, "dir: cannot add first sharer for {address:#x}");
                entry.set_owner(Some(req.requester));
                entry.set_forwarder(None);
                entry.set_state(DirectoryState::Modified);
                self.retrieve_data_and_reply(address, MsgType::ExRep, ctx);
            }
            DirectoryState::Owned => protocol_fail!("dir: OWNED entry for {address:#x} is not supported"),
        }
    }

    fn process_sh(&mut self, address: u64, ctx: &mut DirCtx<'_>) {
        let req = self.head(address);
        let protocol = self.protocol;
        let entry = self.entry_mut(address);
        match entry.state() {
            DirectoryState::Modified | DirectoryState::Exclusive => {
                let owner = entry.owner();
                protocol_assert!(
                    owner.is_some() && owner != Some(req.requester),
                    "dir: SH_REQ {address:#x} from {} but entry is {} owned by {owner:?}",
                    req.requester,
                    entry.state()
                );
                if let (Some(owner), false) = (owner, req.invalidations_sent) {
                    self.mark_sent(address);
                    self.stats.writebacks += 1;
                    self.send(ctx, MsgType::WbReq, owner, &req);
                }
            }
            DirectoryState::Shared => {
                if req.forwarding_from.is_some() {
                    return;
                }
                if protocol == Protocol::Mesif && req.data.is_none() && !req.retry {
                    if let Some(forwarder) = entry.forwarder().filter(|&f| f != req.requester) {
                        if let Some(head) = self.queue.front_mut(address) {
                            head.forwarding_from = Some(forwarder);
                        }
                        self.stats.forwards += 1;
                        self.send(ctx, MsgType::WbReq, forwarder, &req);
                        return;
                    }
                }
                protocol_assert!(
                    !entry.has_sharer(req.requester),
                    "dir: SH_REQ {address:#x} from {} which is already a sharer",
                    req.requester
                );
                if !entry.add_sharer(req.requester) {
                    // Limited entry at capacity: make room first.
                    if !req.invalidations_sent {
                        let seed = self.next_random();
                        let victim = self.cache.get(address).and_then(|e| e.one_sharer(None, seed));
                        if let Some(victim) = victim {
                            warn!(
                                target: "cohsim::directory",
                                "dir{}: sharer list of {address:#x} full, invalidating {victim}",
                                self.home
                            );
                            self.mark_sent(address);
                            self.stats.sharer_evictions += 1;
                            self.stats.invalidations += 1;
                            self.send(ctx, MsgType::InvReq, victim, &req);
                        }
                    }
                    return;
                }
                if protocol == Protocol::Mesif {
                    entry.set_forwarder(Some(req.requester));
                }
                self.retrieve_data_and_reply(address, MsgType::ShRep, ctx);
            }
            DirectoryState::Uncached => {
                let added = entry.add_sharer(req.requester);
                protocol_assert!(added, "dir: cannot add first sharer for {address:#x}");
                if protocol == Protocol::Msi {
                    entry.set_state(DirectoryState::Shared);
                    self.retrieve_data_and_reply(address, MsgType::ShRep, ctx);
                } else {
                    entry.set_owner(Some(req.requester));
                    entry.set_forwarder(None);
                    entry.set_state(DirectoryState::Exclusive);
                    self.retrieve_data_and_reply(address, MsgType::ExRep, ctx);
                }
            }
            DirectoryState::Owned => protocol_fail!("dir: OWNED entry for {address:#x} is not supported"),
        }
    }

    fn process_upgrade(&mut self, address: u64, ctx: &mut DirCtx<'_>) {
        let req = self.head(address);
        let entry = self.entry_mut(address);
        match entry.state() {
            DirectoryState::Shared if entry.has_sharer(req.requester) => {
                if entry.num_sharers() == 1 {
                    entry.set_owner(Some(req.requester));
                    entry.set_forwarder(None);
                    entry.set_state(DirectoryState::Modified);
                    debug!(
                        target: "cohsim::directory",
                        "dir{} -> UPGRADE_REP {address:#x} to {} @{}",
                        self.home, req.requester, req.time
                    );
                    ctx.net.send(
                        ShmemMsg::new(
                            MsgType::UpgradeRep,
                            self.endpoint(),
                            Endpoint::Cache(req.requester),
                            req.requester,
                            address,
                            req.time,
                        )
                        .with_hit_where(HitWhere::Remote)
                        .with_prefetch(req.is_prefetch),
                    );
                    self.process_next(address, req.time, ctx);
                } else if !req.invalidations_sent {
                    self.mark_sent(address);
                    self.invalidate_sharers(&req, Some(req.requester), ctx);
                }
            }
            DirectoryState::Shared => {
                // The requester lost its copy; fetch it from a sharer instead of the backing store.
                if !req.invalidations_sent {
                    self.mark_sent(address);
                    self.stats.upgrade_fallbacks += 1;
                    let seed = self.next_random();
                    let supplier = self
                        .cache
                        .get(address)
                        .and_then(|e| e.forwarder().or_else(|| e.one_sharer(None, seed)));
                    let (targets, broadcast) = self.invalidation_targets(address);
                    if broadcast {
                        self.stats.broadcasts += 1;
                    }
                    for node in targets.into_iter().filter(|&n| n != req.requester) {
                        if Some(node) == supplier {
                            self.stats.flushes += 1;
                            self.send(ctx, MsgType::FlushReq, node, &req);
                        } else {
                            self.stats.invalidations += 1;
                            self.send(ctx, MsgType::InvReq, node, &req);
                        }
                    }
                }
            }
            DirectoryState::Uncached | DirectoryState::Exclusive | DirectoryState::Modified => {
                // No longer a plain upgrade: serve it as an exclusive request.
                if !req.invalidations_sent {
                    self.stats.upgrade_fallbacks += 1;
                }
                if let Some(head) = self.queue.front_mut(address) {
                    head.kind = ReqKind::Exclusive;
                    head.invalidations_sent = false;
                }
                self.process_ex(address, ctx);
            }
            DirectoryState::Owned => protocol_fail!("dir: OWNED entry for {address:#x} is not supported"),
        }
    }

    fn process_nullify(&mut self, address: u64, ctx: &mut DirCtx<'_>) {
        let req = self.head(address);
        let entry = self.entry_mut(address);
        match entry.state() {
            DirectoryState::Modified | DirectoryState::Exclusive => {
                if let (Some(owner), false) = (entry.owner(), req.invalidations_sent) {
                    self.mark_sent(address);
                    self.stats.flushes += 1;
                    self.send(ctx, MsgType::FlushReq, owner, &req);
                }
            }
            DirectoryState::Shared => {
                if !req.invalidations_sent {
                    self.mark_sent(address);
                    self.invalidate_sharers(&req, None, ctx);
                }
            }
            DirectoryState::Uncached => {
                debug!(target: "cohsim::directory", "dir{}: nullified {address:#x}", self.home);
                self.stats.nullifies += 1;
                self.cache.invalidate(address);
                self.process_next(address, req.time, ctx);
            }
            DirectoryState::Owned => protocol_fail!("dir: OWNED entry for {address:#x} is not supported"),
        }
    }

    // ══════════════════════════════════════════════════════════
    // Acknowledgements
    // ══════════════════════════════════════════════════════════

    fn release_owner(&mut self, address: u64, sender: NodeId, what: MsgType) {
        let entry = self.entry_mut(address);
        protocol_assert!(
            entry.owner() == Some(sender),
            "dir: {what} {address:#x} from {sender} but owner is {:?} ({})",
            entry.owner(),
            entry.state()
        );
        entry.remove_sharer(sender);
        entry.set_owner(None);
        entry.set_state(DirectoryState::Uncached);
    }

    fn release_sharer(&mut self, address: u64, sender: NodeId) {
        let entry = self.entry_mut(address);
        entry.remove_sharer(sender);
        if entry.num_sharers() == 0 {
            entry.set_state(DirectoryState::Uncached);
        }
    }

    fn touch_head(&mut self, address: u64, time: u64) -> Option<ReqKind> {
        let head = self.queue.front_mut(address)?;
        head.time = head.time.max(time);
        Some(head.kind)
    }

    fn state_of(&self, address: u64) -> DirectoryState {
        self.cache
            .get(address)
            .map_or(DirectoryState::Uncached, DirectoryEntry::state)
    }

    fn process_inv_rep(&mut self, sender: NodeId, msg: &ShmemMsg, ctx: &mut DirCtx<'_>) {
        let address = msg.address;
        match self.entry_mut(address).state() {
            DirectoryState::Shared => self.release_sharer(address, sender),
            DirectoryState::Exclusive | DirectoryState::Modified => {
                self.release_owner(address, sender, MsgType::InvRep);
            }
            state => protocol_fail!("dir: INV_REP {address:#x} from {sender} with entry {state}"),
        }

        let Some(kind) = self.touch_head(address, msg.time) else {
            return;
        };
        let uncached = self.state_of(address) == DirectoryState::Uncached;
        match kind {
            ReqKind::Exclusive if uncached => self.process_ex(address, ctx),
            ReqKind::Shared => {
                let forwarding = self.queue.front(address).and_then(|r| r.forwarding_from);
                match forwarding {
                    Some(forwarder) if forwarder == sender => {
                        // Forwarder evicted the line before answering; go to the backing store.
                        self.stats.forward_failures += 1;
                        if let Some(head) = self.queue.front_mut(address) {
                            head.forwarding_from = None;
                            head.retry = true;
                        }
                        self.process_sh(address, ctx);
                    }
                    Some(_) => {}
                    None => self.process_sh(address, ctx),
                }
            }
            ReqKind::Upgrade => self.process_upgrade(address, ctx),
            ReqKind::Nullify if uncached => self.process_nullify(address, ctx),
            _ => {}
        }
    }

    fn process_flush_rep(&mut self, sender: NodeId, msg: ShmemMsg, ctx: &mut DirCtx<'_>) {
        let address = msg.address;
        match self.entry_mut(address).state() {
            DirectoryState::Exclusive | DirectoryState::Modified => {
                self.release_owner(address, sender, MsgType::FlushRep);
            }
            DirectoryState::Shared => self.release_sharer(address, sender),
            state => protocol_fail!("dir: FLUSH_REP {address:#x} from {sender} with entry {state}"),
        }

        let Some(kind) = self.touch_head(address, msg.time) else {
            // Plain eviction.
            if msg.dirty {
                self.write_back(address, msg.data.as_deref(), ctx);
            }
            return;
        };
        let uncached = self.state_of(address) == DirectoryState::Uncached;
        match kind {
            ReqKind::Exclusive => {
                self.keep_data(address, msg.data);
                if uncached {
                    self.process_ex(address, ctx);
                }
            }
            ReqKind::Shared => {
                if msg.dirty {
                    self.write_back(address, msg.data.as_deref(), ctx);
                }
                self.keep_data(address, msg.data);
                self.process_sh(address, ctx);
            }
            ReqKind::Upgrade => {
                self.keep_data(address, msg.data);
                self.process_upgrade(address, ctx);
            }
            ReqKind::Nullify => {
                if msg.dirty {
                    self.write_back(address, msg.data.as_deref(), ctx);
                }
                if uncached {
                    self.process_nullify(address, ctx);
                }
            }
        }
    }

    fn process_wb_rep(&mut self, sender: NodeId, msg: ShmemMsg, ctx: &mut DirCtx<'_>) {
        let address = msg.address;
        let entry = self.entry_mut(address);
        match entry.state() {
            DirectoryState::Exclusive | DirectoryState::Modified => {
                protocol_assert!(
                    entry.owner() == Some(sender) && entry.has_sharer(sender),
                    "dir: WB_REP {address:#x} from {sender} but owner is {:?} ({})",
                    entry.owner(),
                    entry.state()
                );
                entry.set_owner(None);
                entry.set_state(DirectoryState::Shared);
            }
            DirectoryState::Shared => {
                protocol_assert!(
                    entry.has_sharer(sender),
                    "dir: WB_REP {address:#x} from {sender} which is not a sharer"
                );
            }
            state => protocol_fail!("dir: WB_REP {address:#x} from {sender} with entry {state}"),
        }

        let kind = self.touch_head(address, msg.time);
        protocol_assert!(
            kind == Some(ReqKind::Shared),
            "dir: WB_REP {address:#x} from {sender} while head is {kind:?}"
        );
        if let Some(head) = self.queue.front_mut(address) {
            // The write-back round is over; a full sharer list may still need an invalidation.
            head.invalidations_sent = false;
            if head.forwarding_from == Some(sender) {
                head.forwarding_from = None;
                self.stats.forward_hits += 1;
            }
        }
        if msg.dirty {
            self.write_back(address, msg.data.as_deref(), ctx);
        }
        self.keep_data(address, msg.data);
        self.process_sh(address, ctx);
    }

    fn keep_data(&mut self, address: u64, data: Option<Box<[u8]>>) {
        if let (Some(head), Some(data)) = (self.queue.front_mut(address), data) {
            head.data = Some(data);
        }
    }
}
