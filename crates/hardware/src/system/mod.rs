//! The coherent memory system.
//!
//! `MemorySystem` owns every cache controller in an arena and wires them together by index:
//! 1. **Hierarchy:** Per-core first-level caches feed shared or private outer levels; the
//!    last-level instances are the coherence nodes the directory tracks.
//! 2. **User path:** `access` runs a core request down the hierarchy and fills on the way back
//!    (`core_path`).
//! 3. **Eviction protocol:** Insertion, back-invalidation, write-back and forced downgrades
//!    (`eviction`).
//! 4. **Directory side:** Requests to the directory, replies and forwarded demands, and the
//!    synchronous message pump (`remote`).
//! 5. **Diagnostics:** Global invariant checks on a quiescent system (`verify`) and the
//!    statistics report.
//!
//! The engine is single-threaded; [`SharedSystem`](crate::sync::SharedSystem) wraps it for
//! one-thread-per-core use.

/// Cache controller record.
pub mod cntlr;

mod core_path;
mod eviction;
mod remote;
mod verify;

use std::fmt;

use tracing::debug;

pub use cntlr::{CacheCntlr, DirectoryWaiter, operation_permissible};

use crate::coherence::{CacheState, HitWhere, MsgType};
use crate::common::{CacheId, CacheLevel, ConfigError, MemOp, NodeId, Port, line_base, line_offset};
use crate::config::{CacheConfig, Config, Protocol};
use crate::directory::{DirectoryCntlr, DirectoryEntry, home_of};
use crate::dram::{BackingStore, DramCntlr};
use crate::network::{MsgRecord, Network};
use crate::stats::StatsSink;

/// Outcome of one access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessResult {
    /// Where the access was satisfied.
    pub hit_where: HitWhere,
    /// Cycles the access took.
    pub latency: u64,
}

#[derive(Clone, Copy, Debug)]
struct CoreSlot {
    l1i: Option<CacheId>,
    l1d: CacheId,
    time: u64,
}

/// A directory reply that released a waiting request.
#[derive(Clone, Copy, Debug)]
struct Wakeup {
    cache: CacheId,
    address: u64,
    time: u64,
}

/// The complete coherent memory hierarchy of a multi-core machine.
pub struct MemorySystem {
    cntlrs: Vec<CacheCntlr>,
    cores: Vec<CoreSlot>,
    nodes: Vec<CacheId>,
    directories: Vec<DirectoryCntlr>,
    homes: usize,
    network: Network,
    dram: Box<dyn BackingStore>,
    wakeups: Vec<Wakeup>,
    line_size: usize,
    protocol: Protocol,
}

impl fmt::Debug for MemorySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySystem")
            .field("cores", &self.cores.len())
            .field("caches", &self.cntlrs.len())
            .field("nodes", &self.nodes.len())
            .field("homes", &self.homes)
            .field("line_size", &self.line_size)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl MemorySystem {
    /// Builds a memory system with the bundled backing store.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated before anything is built.
    ///
    /// # Returns
    ///
    /// The memory system, or the first configuration problem found.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let dram = DramCntlr::from_config(config.general.line_bytes, &config.memory);
        Self::with_backing_store(config, Box::new(dram))
    }

    /// Builds a memory system on top of a caller-supplied backing store.
    pub fn with_backing_store(config: &Config, dram: Box<dyn BackingStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        let line = config.general.line_bytes;
        let num_cores = config.general.num_cores;
        let mut cntlrs: Vec<CacheCntlr> = Vec::new();

        let build = |cntlrs: &mut Vec<CacheCntlr>, level: CacheLevel, cfg: &CacheConfig| -> Vec<CacheId> {
            (0..num_cores / cfg.shared_cores)
                .map(|instance| {
                    let id = CacheId(cntlrs.len());
                    cntlrs.push(CacheCntlr::new(id, level, instance, cfg, line));
                    id
                })
                .collect()
        };

        let mut outer: Vec<(CacheLevel, &CacheConfig, Vec<CacheId>)> = Vec::new();
        for (name, cfg) in config.outer_levels() {
            let level = if name == "L3" { CacheLevel::L3 } else { CacheLevel::L2 };
            let ids = build(&mut cntlrs, level, cfg);
            outer.push((level, cfg, ids));
        }
        for pair in outer.windows(2) {
            let (_, inner_cfg, inner_ids) = &pair[0];
            let (_, outer_cfg, outer_ids) = &pair[1];
            for (i, &id) in inner_ids.iter().enumerate() {
                let core = i * inner_cfg.shared_cores;
                link(&mut cntlrs, id, outer_ids[core / outer_cfg.shared_cores]);
            }
        }

        let mut nodes = Vec::new();
        if let Some((_, _, llc_ids)) = outer.last() {
            for (n, &id) in llc_ids.iter().enumerate() {
                cntlrs[id.0].node = Some(NodeId(n));
                nodes.push(id);
            }
        }

        let (_, l2_cfg, l2_ids) = &outer[0];
        let l2_shared = l2_cfg.shared_cores;
        let l2_ids = l2_ids.clone();
        let l1d_cfg = &config.cache.l1_d;
        let l1d_ids = build(&mut cntlrs, CacheLevel::L1D, l1d_cfg);
        for (i, &id) in l1d_ids.iter().enumerate() {
            link(&mut cntlrs, id, l2_ids[i * l1d_cfg.shared_cores / l2_shared]);
        }
        let l1i_cfg = &config.cache.l1_i;
        let l1i_ids = if l1i_cfg.enabled {
            let ids = build(&mut cntlrs, CacheLevel::L1I, l1i_cfg);
            for (i, &id) in ids.iter().enumerate() {
                link(&mut cntlrs, id, l2_ids[i * l1i_cfg.shared_cores / l2_shared]);
            }
            ids
        } else {
            Vec::new()
        };

        let cores = (0..num_cores)
            .map(|c| CoreSlot {
                l1i: l1i_ids.get(c / l1i_cfg.shared_cores).copied(),
                l1d: l1d_ids[c / l1d_cfg.shared_cores],
                time: 0,
            })
            .collect();

        let directories = if config.directory.enabled {
            (0..config.directory.homes)
                .map(|home| DirectoryCntlr::new(home, config))
                .collect()
        } else {
            Vec::new()
        };

        debug!(
            target: "cohsim::system",
            "built {} caches for {num_cores} cores, {} nodes, {} directory homes ({:?})",
            cntlrs.len(),
            nodes.len(),
            directories.len(),
            config.directory.protocol
        );

        Ok(Self {
            cntlrs,
            cores,
            nodes,
            homes: config.directory.homes.max(1),
            directories,
            network: Network::new(config.network.hop_latency),
            dram,
            wakeups: Vec::new(),
            line_size: line,
            protocol: config.directory.protocol,
        })
    }

    // ══════════════════════════════════════════════════════════
    // Core interface
    // ══════════════════════════════════════════════════════════

    /// Runs one memory operation from a core.
    ///
    /// # Arguments
    ///
    /// * `core` - Issuing core.
    /// * `port` - Instruction or data side; instruction fetches use the L1-I when present.
    /// * `op` - Operation.
    /// * `address` - Line-aligned address.
    /// * `offset` - First byte within the line.
    /// * `data` - Bytes to write, or the buffer to read into; `offset + data.len()` must not
    ///   exceed the line.
    /// * `modeled` - Timed access; `false` for warmup, which installs lines without advancing time.
    ///
    /// # Returns
    ///
    /// Where the access was satisfied and how long it took.
    pub fn access(
        &mut self,
        core: usize,
        port: Port,
        op: MemOp,
        address: u64,
        offset: usize,
        data: &mut [u8],
        modeled: bool,
    ) -> AccessResult {
        protocol_assert!(core < self.cores.len(), "access from core {core} of {}", self.cores.len());
        protocol_assert!(
            offset + data.len() <= self.line_size,
            "access to {address:#x} at offset {offset} length {} crosses the line",
            data.len()
        );
        let l1 = self.first_level(core, port);
        let result = self.process_mem_op_from_core(l1, core, op, address, offset, data, modeled);
        self.drain();
        result
    }

    /// Like [`MemorySystem::access`], but only if the first-level cache already holds the line
    /// with sufficient permission.
    ///
    /// # Returns
    ///
    /// `None` without side effects when the access would leave the first level.
    pub fn access_if_first_level_hit(
        &mut self,
        core: usize,
        port: Port,
        op: MemOp,
        address: u64,
        offset: usize,
        data: &mut [u8],
        modeled: bool,
    ) -> Option<AccessResult> {
        let l1 = self.first_level(core, port);
        let state = self.cntlrs[l1.0].cache.state(address);
        if !operation_permissible(state, op) {
            return None;
        }
        Some(self.access(core, port, op, address, offset, data, modeled))
    }

    /// Reads bytes from the data side; the range must stay within one line.
    pub fn read(&mut self, core: usize, address: u64, buf: &mut [u8]) -> AccessResult {
        let base = line_base(address, self.line_size);
        let offset = line_offset(address, self.line_size);
        self.access(core, Port::Data, MemOp::Read, base, offset, buf, true)
    }

    /// Writes bytes from the data side; the range must stay within one line.
    pub fn write(&mut self, core: usize, address: u64, data: &[u8]) -> AccessResult {
        let base = line_base(address, self.line_size);
        let offset = line_offset(address, self.line_size);
        let mut buf = data.to_vec();
        self.access(core, Port::Data, MemOp::Write, base, offset, &mut buf, true)
    }

    /// Installs a line at a non-first level on behalf of a prefetcher.
    ///
    /// The line is tagged as prefetched; a later demand hit clears the tag and counts as a
    /// prefetch hit.
    ///
    /// # Arguments
    ///
    /// * `core` - Core whose hierarchy receives the line.
    /// * `level` - Target level (`L2` or `L3`).
    /// * `address` - Any address within the line.
    pub fn prefetch(&mut self, core: usize, level: CacheLevel, address: u64) -> AccessResult {
        let Some(target) = self.cache_id(core, level) else {
            protocol_fail!("prefetch into {level} for core {core}: no such cache")
        };
        protocol_assert!(level.depth() > 1, "prefetch into first-level cache {level}");
        let address = line_base(address, self.line_size);
        let result = self.process_prefetch(target, core, address);
        self.drain();
        result
    }

    // ══════════════════════════════════════════════════════════
    // Inspection
    // ══════════════════════════════════════════════════════════

    /// Number of cores.
    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    /// Line size in bytes.
    pub const fn line_size(&self) -> usize {
        self.line_size
    }

    /// Coherence protocol in use.
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns `true` when last-level caches talk to the backing store directly.
    pub fn is_direct_dram(&self) -> bool {
        self.directories.is_empty()
    }

    /// Simulated time of a core.
    pub fn core_time(&self, core: usize) -> u64 {
        self.cores.get(core).map_or(0, |c| c.time)
    }

    /// Every cache controller, in arena order.
    pub fn controllers(&self) -> &[CacheCntlr] {
        &self.cntlrs
    }

    /// The cache serving `core` at `level`.
    pub fn cache_for(&self, core: usize, level: CacheLevel) -> Option<&CacheCntlr> {
        self.cache_id(core, level).map(|id| &self.cntlrs[id.0])
    }

    /// State of a line in the cache serving `core` at `level`.
    pub fn line_state(&self, core: usize, level: CacheLevel, address: u64) -> CacheState {
        self.cache_for(core, level).map_or(CacheState::Invalid, |c| {
            c.cache.state(line_base(address, self.line_size))
        })
    }

    /// Coherence node (last-level instance) serving a core.
    pub fn node_of_core(&self, core: usize) -> NodeId {
        let mut id = self.cores[core].l1d;
        while let Some(next) = self.cntlrs[id.0].next {
            id = next;
        }
        self.cntlrs[id.0].node.unwrap_or(NodeId(0))
    }

    /// Directory entry of a line, if its home tracks it.
    pub fn directory_entry(&self, address: u64) -> Option<&DirectoryEntry> {
        let address = line_base(address, self.line_size);
        self.directories
            .get(home_of(address, self.line_size, self.homes))
            .and_then(|d| d.entry(address))
    }

    /// Directory controllers, by home.
    pub fn directories(&self) -> &[DirectoryCntlr] {
        &self.directories
    }

    /// Message transport.
    pub const fn network(&self) -> &Network {
        &self.network
    }

    /// Starts recording delivered coherence messages.
    pub fn enable_message_trace(&mut self) {
        self.network.enable_trace();
    }

    /// Messages delivered since tracing was enabled or last taken.
    pub fn take_message_trace(&mut self) -> Vec<MsgRecord> {
        self.network.take_trace()
    }

    /// Pushes every counter into a sink.
    pub fn report(&self, sink: &mut dyn StatsSink) {
        for cntlr in &self.cntlrs {
            cntlr.stats.report(cntlr.level.name(), cntlr.instance, sink);
        }
        for (home, dir) in self.directories.iter().enumerate() {
            dir.stats().report(home, sink);
        }
        let net = self.network.stats();
        for msg_type in MsgType::ALL {
            sink.record("network", 0, msg_type.name(), net.sent[msg_type.index()]);
        }
        sink.record("network", 0, "data-messages", net.data_messages);
        for (core, slot) in self.cores.iter().enumerate() {
            sink.record("core", core, "time", slot.time);
        }
    }

    // ══════════════════════════════════════════════════════════
    // Arena helpers
    // ══════════════════════════════════════════════════════════

    fn first_level(&self, core: usize, port: Port) -> CacheId {
        let slot = &self.cores[core];
        match port {
            Port::Instruction => slot.l1i.unwrap_or(slot.l1d),
            Port::Data => slot.l1d,
        }
    }

    fn cache_id(&self, core: usize, level: CacheLevel) -> Option<CacheId> {
        let slot = self.cores.get(core)?;
        if level == CacheLevel::L1I {
            return slot.l1i;
        }
        let mut id = slot.l1d;
        while self.cntlrs[id.0].level != level {
            id = self.cntlrs[id.0].next?;
        }
        Some(id)
    }

    fn home_endpoint(&self, address: u64) -> usize {
        home_of(address, self.line_size, self.homes)
    }
}

fn link(cntlrs: &mut [CacheCntlr], inner: CacheId, outer: CacheId) {
    cntlrs[inner.0].next = Some(outer);
    if !cntlrs[outer.0].prev.contains(&inner) {
        cntlrs[outer.0].prev.push(inner);
    }
}
