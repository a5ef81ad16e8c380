//! Backing store and latency modeling.
//!
//! This module provides:
//! 1. **BackingStore:** The interface the last level (direct mode) and the directory use to read
//!    and write whole lines beyond the caches.
//! 2. **SimpleController:** Fixed latency per access (no row-buffer modeling).
//! 3. **DramController:** Row-buffer-aware latency (CAS, RAS, precharge) for DRAM-style timing.
//! 4. **DramCntlr:** The bundled backing store: sparse line storage plus one of the controllers.
//!
//! Memory that was never written reads as zeros.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::coherence::HitWhere;
use crate::common::line_base;
use crate::config::{MemoryConfig, MemoryController as ControllerKind};

/// Result of a backing-store read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DramAccess {
    /// Cycles the read took.
    pub latency: u64,
    /// Where the data came from, reported back to the requester.
    pub hit_where: HitWhere,
}

/// Line-granular storage beyond the caches.
///
/// Implementors must be `Send` so a memory system can be moved into the thread-safe front end.
pub trait BackingStore: Send {
    /// Reads one line.
    ///
    /// # Arguments
    ///
    /// * `address` - Line address.
    /// * `buf` - Destination, one line long.
    ///
    /// # Returns
    ///
    /// Latency and location of the read.
    fn read(&mut self, address: u64, buf: &mut [u8]) -> DramAccess;

    /// Writes one line.
    ///
    /// # Returns
    ///
    /// Latency in cycles.
    fn write(&mut self, address: u64, data: &[u8]) -> u64;
}

/// Trait for memory controller implementations that report access latency in cycles.
pub trait MemoryController: Send + Sync {
    /// Returns the number of cycles required for an access to the given address.
    ///
    /// # Arguments
    ///
    /// * `addr` - Physical address being accessed (may be used for row-buffer modeling).
    ///
    /// # Returns
    ///
    /// Latency in simulation cycles.
    fn access_latency(&mut self, addr: u64) -> u64;
}

/// Fixed-latency memory controller; every access takes the same number of cycles.
#[derive(Debug, Clone)]
pub struct SimpleController {
    latency: u64,
}

impl SimpleController {
    /// Creates a simple controller with the given fixed latency in cycles.
    pub const fn new(latency: u64) -> Self {
        Self { latency }
    }
}

impl MemoryController for SimpleController {
    fn access_latency(&mut self, _addr: u64) -> u64 {
        self.latency
    }
}

/// DRAM-style controller with a single open row.
///
/// A hit on the open row costs `t_cas`. Switching rows costs a precharge plus activation.
/// The first access only activates.
#[derive(Debug, Clone)]
pub struct DramController {
    last_row: Option<u64>,
    t_cas: u64,
    t_ras: u64,
    t_pre: u64,
    row_mask: u64,
}

impl DramController {
    /// Creates a DRAM controller with the given timing parameters (in cycles).
    ///
    /// # Arguments
    ///
    /// * `t_cas` - Column access strobe latency.
    /// * `t_ras` - Row access strobe latency.
    /// * `t_pre` - Precharge latency.
    pub const fn new(t_cas: u64, t_ras: u64, t_pre: u64) -> Self {
        Self {
            last_row: None,
            t_cas,
            t_ras,
            t_pre,
            row_mask: !2047,
        }
    }
}

impl MemoryController for DramController {
    fn access_latency(&mut self, addr: u64) -> u64 {
        let row = addr & self.row_mask;
        match self.last_row {
            Some(open_row) if open_row == row => self.t_cas,
            Some(_) => {
                self.last_row = Some(row);
                self.t_pre + self.t_ras + self.t_cas
            }
            None => {
                self.last_row = Some(row);
                self.t_ras + self.t_cas
            }
        }
    }
}

/// Bundled backing store: sparse line map plus a latency controller.
pub struct DramCntlr {
    line_size: usize,
    lines: HashMap<u64, Box<[u8]>>,
    controller: Box<dyn MemoryController>,
    reads: u64,
    writes: u64,
}

impl fmt::Debug for DramCntlr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DramCntlr")
            .field("line_size", &self.line_size)
            .field("lines", &self.lines.len())
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

impl DramCntlr {
    /// Creates an empty store.
    pub fn new(line_size: usize, controller: Box<dyn MemoryController>) -> Self {
        Self {
            line_size,
            lines: HashMap::new(),
            controller,
            reads: 0,
            writes: 0,
        }
    }

    /// Creates an empty store with the controller named by the configuration.
    pub fn from_config(line_size: usize, config: &MemoryConfig) -> Self {
        let controller: Box<dyn MemoryController> = match config.controller {
            ControllerKind::Simple => Box::new(SimpleController::new(config.latency)),
            ControllerKind::Dram => Box::new(DramController::new(config.t_cas, config.t_ras, config.t_pre)),
        };
        Self::new(line_size, controller)
    }

    /// Stored contents of a line, `None` if it was never written.
    pub fn peek(&self, address: u64) -> Option<&[u8]> {
        self.lines
            .get(&line_base(address, self.line_size))
            .map(AsRef::as_ref)
    }

    /// Number of line reads served.
    pub const fn reads(&self) -> u64 {
        self.reads
    }

    /// Number of line writes absorbed.
    pub const fn writes(&self) -> u64 {
        self.writes
    }
}

impl BackingStore for DramCntlr {
    fn read(&mut self, address: u64, buf: &mut [u8]) -> DramAccess {
        self.reads += 1;
        match self.lines.get(&line_base(address, self.line_size)) {
            Some(line) => buf.copy_from_slice(&line[..buf.len()]),
            None => buf.fill(0),
        }
        let latency = self.controller.access_latency(address);
        trace!(address = format_args!("{address:#x}"), latency, "dram read");
        DramAccess {
            latency,
            hit_where: HitWhere::Dram,
        }
    }

    fn write(&mut self, address: u64, data: &[u8]) -> u64 {
        self.writes += 1;
        let _ = self
            .lines
            .insert(line_base(address, self.line_size), data.into());
        let latency = self.controller.access_latency(address);
        trace!(address = format_args!("{address:#x}"), latency, "dram write");
        latency
    }
}
