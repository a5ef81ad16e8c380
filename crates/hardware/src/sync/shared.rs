//! Thread-safe front end for one-thread-per-core simulation.

use parking_lot::Mutex;
use tracing::trace;

use super::setlock::SetLock;
use crate::common::{CacheLevel, MemOp, Port, line_base, line_offset};
use crate::system::{AccessResult, MemorySystem};

/// A [`MemorySystem`] that several threads can drive at once.
///
/// Every access first takes the set lock of its last-level node in shared mode and tries the
/// first-level cache alone. If the line is not there with enough permission the hold is
/// upgraded to exclusive and the full access runs. The engine mutex is never held while
/// waiting for a set lock.
///
/// Every access, first-level hits included, runs under the single engine mutex. Accesses from
/// unrelated cores are therefore serialized; the set locks order accesses to the same set
/// but add no parallelism.
#[derive(Debug)]
pub struct SharedSystem {
    engine: Mutex<MemorySystem>,
    set_locks: Vec<Vec<SetLock>>,
    node_of_core: Vec<usize>,
    sets: usize,
    line_size: usize,
}

impl SharedSystem {
    /// Wraps a memory system.
    ///
    /// Each last-level node gets one set lock per first-level set.
    pub fn new(system: MemorySystem) -> Self {
        let cores = system.num_cores();
        let sets = [CacheLevel::L1D, CacheLevel::L1I]
            .into_iter()
            .filter_map(|level| system.cache_for(0, level))
            .map(|c| c.cache().num_sets())
            .max()
            .unwrap_or(1);
        let node_of_core: Vec<usize> = (0..cores).map(|core| system.node_of_core(core).0).collect();
        let nodes = node_of_core.iter().max().map_or(1, |&n| n + 1);
        let set_locks = (0..nodes)
            .map(|_| (0..sets).map(|_| SetLock::new()).collect())
            .collect();
        Self {
            line_size: system.line_size(),
            engine: Mutex::new(system),
            set_locks,
            node_of_core,
            sets,
        }
    }

    /// Runs one access from `core`; the byte range must stay within one line.
    ///
    /// # Arguments
    ///
    /// * `core` - Issuing core; each core should be driven by one thread at a time.
    /// * `port` - Instruction or data side.
    /// * `op` - Operation.
    /// * `address` - Address of the first byte.
    /// * `data` - Bytes to write, or the buffer to read into.
    /// * `modeled` - Timed access (`false` for warmup).
    pub fn access(&self, core: usize, port: Port, op: MemOp, address: u64, data: &mut [u8], modeled: bool) -> AccessResult {
        let base = line_base(address, self.line_size);
        let offset = line_offset(address, self.line_size);
        let lock = self.set_lock(core, base);

        let shared = lock.shared();
        let fast = self
            .engine
            .lock()
            .access_if_first_level_hit(core, port, op, base, offset, data, modeled);
        if let Some(result) = fast {
            return result;
        }

        let _exclusive = shared.upgrade();
        trace!(core, address = format_args!("{address:#x}"), %op, "leaving first level");
        self.engine.lock().access(core, port, op, base, offset, data, modeled)
    }

    /// Reads bytes from the data side.
    pub fn read(&self, core: usize, address: u64, buf: &mut [u8]) -> AccessResult {
        self.access(core, Port::Data, MemOp::Read, address, buf, true)
    }

    /// Writes bytes from the data side.
    pub fn write(&self, core: usize, address: u64, data: &[u8]) -> AccessResult {
        let mut buf = data.to_vec();
        self.access(core, Port::Data, MemOp::Write, address, &mut buf, true)
    }

    /// Runs `f` with exclusive access to the engine, e.g. for reports or invariant checks.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut MemorySystem) -> R) -> R {
        f(&mut self.engine.lock())
    }

    /// Number of cores.
    pub fn num_cores(&self) -> usize {
        self.node_of_core.len()
    }

    /// Unwraps the memory system.
    pub fn into_inner(self) -> MemorySystem {
        self.engine.into_inner()
    }

    fn set_lock(&self, core: usize, address: u64) -> &SetLock {
        let set = ((address / self.line_size as u64) % self.sets as u64) as usize;
        &self.set_locks[self.node_of_core[core]][set]
    }
}
