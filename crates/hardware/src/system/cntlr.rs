//! Cache controller record.
//!
//! A `CacheCntlr` is one cache level instance: its set store, its miss tracking and the arena
//! indices of its neighbours. The protocol itself runs in [`MemorySystem`](super::MemorySystem),
//! which owns every controller and walks between them by index.

use crate::cache::Cache;
use crate::coherence::{CacheState, HitWhere};
use crate::common::{CacheId, CacheLevel, MemOp, NodeId, Prefetch};
use crate::config::CacheConfig;
use crate::mshr::{Mshr, OutstandingMisses};
use crate::req_queue::ReqQueueList;
use crate::stats::CacheStats;

/// A request parked at a last-level cache until the directory replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryWaiter {
    /// The request needs a writable line.
    pub exclusive: bool,
    /// Prefetch tagging of the request that missed here.
    pub prefetch: Prefetch,
    /// Timed access (as opposed to warmup).
    pub modeled: bool,
    /// Core that issued the access.
    pub core: Option<usize>,
    /// Time the request left this cache.
    pub t_issue: u64,
}

/// One cache level instance.
#[derive(Debug)]
pub struct CacheCntlr {
    pub(crate) id: CacheId,
    pub(crate) level: CacheLevel,
    pub(crate) instance: usize,
    pub(crate) cache: Cache,
    pub(crate) next: Option<CacheId>,
    pub(crate) prev: Vec<CacheId>,
    pub(crate) node: Option<NodeId>,
    pub(crate) coherent: bool,
    pub(crate) perfect: bool,
    pub(crate) data_latency: u64,
    pub(crate) tags_latency: u64,
    pub(crate) writeback_latency: u64,
    pub(crate) mshr: Mshr,
    pub(crate) outstanding: OutstandingMisses,
    pub(crate) waiters: ReqQueueList<DirectoryWaiter>,
    pub(crate) evicting: Option<(u64, Box<[u8]>)>,
    pub(crate) last_remote_hit_where: Option<HitWhere>,
    pub(crate) stats: CacheStats,
}

impl CacheCntlr {
    /// Creates a controller from its level configuration.
    pub(crate) fn new(id: CacheId, level: CacheLevel, instance: usize, config: &CacheConfig, line_size: usize) -> Self {
        let name = format!("{}[{instance}]", level.name());
        Self {
            id,
            level,
            instance,
            cache: Cache::new(name, config.size_bytes, config.ways, line_size, config.policy),
            next: None,
            prev: Vec::new(),
            node: None,
            coherent: config.coherent,
            perfect: config.perfect,
            data_latency: config.data_latency,
            tags_latency: config.tags_latency,
            writeback_latency: config.writeback_latency,
            mshr: Mshr::new(config.mshr_entries),
            outstanding: OutstandingMisses::new(config.outstanding_misses),
            waiters: ReqQueueList::new(),
            evicting: None,
            last_remote_hit_where: None,
            stats: CacheStats::default(),
        }
    }

    /// Arena index.
    pub const fn id(&self) -> CacheId {
        self.id
    }

    /// Hierarchy level.
    pub const fn level(&self) -> CacheLevel {
        self.level
    }

    /// Instance index within the level.
    pub const fn instance(&self) -> usize {
        self.instance
    }

    /// Name used in logs, e.g. `L2[1]`.
    pub fn name(&self) -> &str {
        self.cache.name()
    }

    /// Line storage.
    pub const fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Next (outer) level, `None` for the last level.
    pub const fn next(&self) -> Option<CacheId> {
        self.next
    }

    /// Previous (inner) levels feeding this one.
    pub fn prev(&self) -> &[CacheId] {
        &self.prev
    }

    /// Network identity, for last-level instances.
    pub const fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Returns `true` if every access hits.
    pub const fn is_perfect(&self) -> bool {
        self.perfect
    }

    /// Miss tracking table.
    pub const fn mshr(&self) -> &Mshr {
        &self.mshr
    }

    /// Counters.
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Position of `prev` in this controller's previous-level list.
    pub(crate) fn prev_index(&self, prev: CacheId) -> Option<usize> {
        self.prev.iter().position(|&p| p == prev)
    }

    /// Counts an access by line state at the time it arrived.
    pub(crate) const fn count_access(&mut self, op: MemOp, state: CacheState, hit: bool) {
        let i = state.index();
        if matches!(op, MemOp::Write) {
            self.stats.stores += 1;
            self.stats.stores_state[i] += 1;
            if !hit {
                self.stats.store_misses += 1;
                self.stats.store_misses_state[i] += 1;
            }
        } else {
            self.stats.loads += 1;
            self.stats.loads_state[i] += 1;
            if !hit {
                self.stats.load_misses += 1;
                self.stats.load_misses_state[i] += 1;
            }
        }
    }
}

/// Returns `true` if `op` can be served from a copy in `state`.
#[inline]
pub const fn operation_permissible(state: CacheState, op: MemOp) -> bool {
    if op.needs_write() {
        state.writable()
    } else {
        state.readable()
    }
}
