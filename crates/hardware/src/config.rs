//! Configuration system for the coherence engine.
//!
//! This module defines every structure and enum used to parameterize a memory system. It provides:
//! 1. **Defaults:** Baseline hierarchy constants (line size, cache geometry, latencies, directory size).
//! 2. **Structures:** Hierarchical config for general, cache, directory, network and memory settings.
//! 3. **Enums:** Coherence protocol, replacement policy, directory type and memory controller.
//! 4. **Validation:** `Config::validate` rejects inconsistent geometry and sharing before any
//!    controller is built.
//!
//! Configuration is supplied as JSON (`Config::from_json`, `Config::from_file`) or built from
//! `Config::default()` and adjusted in code. It is passed explicitly to constructors.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::ConfigError;

/// Default configuration constants for the memory system.
///
/// These values define the baseline hierarchy when a field is not present in the JSON.
mod defaults {
    /// Number of simulated cores.
    pub const NUM_CORES: usize = 2;

    /// Cache line size in bytes, shared by every level.
    pub const LINE_BYTES: usize = 64;

    /// Default first-level cache size in bytes (32 KiB).
    pub const L1_SIZE: usize = 32 * 1024;

    /// Default first-level associativity.
    pub const L1_WAYS: usize = 8;

    /// Default first-level data access latency in cycles.
    pub const L1_DATA_LATENCY: u64 = 4;

    /// Default second-level cache size in bytes (256 KiB).
    pub const L2_SIZE: usize = 256 * 1024;

    /// Default second-level associativity.
    pub const L2_WAYS: usize = 8;

    /// Default second-level data access latency in cycles.
    pub const L2_DATA_LATENCY: u64 = 12;

    /// Default third-level cache size in bytes (2 MiB).
    pub const L3_SIZE: usize = 2 * 1024 * 1024;

    /// Default third-level associativity.
    pub const L3_WAYS: usize = 16;

    /// Default third-level data access latency in cycles.
    pub const L3_DATA_LATENCY: u64 = 30;

    /// Tag lookup latency in cycles (charged on misses).
    pub const TAGS_LATENCY: u64 = 1;

    /// Latency of pushing dirty data to the next level, in cycles.
    pub const WRITEBACK_LATENCY: u64 = 2;

    /// Entries kept in each controller's outstanding-miss table.
    pub const MSHR_ENTRIES: usize = 8;

    /// Directory entries per home.
    pub const DIR_ENTRIES: usize = 16384;

    /// Directory associativity.
    pub const DIR_ASSOC: usize = 16;

    /// Sharers a limited directory entry tracks before falling back.
    pub const MAX_HW_SHARERS: usize = 64;

    /// Directory lookup latency in cycles.
    pub const DIR_LATENCY: u64 = 10;

    /// Number of directory homes.
    pub const DIR_HOMES: usize = 1;

    /// One-way network latency in cycles.
    pub const HOP_LATENCY: u64 = 8;

    /// Fixed backing-store latency in cycles (simple controller).
    pub const MEM_LATENCY: u64 = 100;

    /// CAS (Column Access Strobe) latency in DRAM cycles.
    pub const T_CAS: u64 = 14;

    /// RAS (Row Access Strobe) latency in DRAM cycles.
    pub const T_RAS: u64 = 14;

    /// Precharge latency in DRAM cycles.
    pub const T_PRE: u64 = 14;
}

/// Coherence protocol variant.
///
/// All variants share the same directory and message set; they differ in whether a
/// lone reader is granted an exclusive-clean copy and whether a forwarder is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// Modified / Shared / Invalid. Every reader gets a shared copy.
    #[serde(alias = "Msi", alias = "msi")]
    Msi,
    /// Adds Exclusive: a reader of an uncached line gets a clean private copy it may
    /// upgrade silently.
    #[default]
    #[serde(alias = "Mesi", alias = "mesi")]
    Mesi,
    /// MESI plus a forwarder: the most recent sharer supplies data for the next reader.
    #[serde(alias = "Mesif", alias = "mesif")]
    Mesif,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msi" => Ok(Self::Msi),
            "mesi" => Ok(Self::Mesi),
            "mesif" => Ok(Self::Mesif),
            _ => Err(ConfigError::UnknownProtocol(s.to_owned())),
        }
    }
}

/// Cache replacement policy algorithms.
///
/// Specifies the algorithm used to select which line to evict when a new line must be
/// installed in a full set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplacementPolicy {
    /// Least Recently Used replacement policy.
    #[default]
    #[serde(alias = "Lru", alias = "lru")]
    Lru,
    /// Pseudo-LRU replacement policy (one recency bit per way).
    #[serde(alias = "Plru", alias = "plru")]
    Plru,
    /// First In First Out replacement policy (round-robin).
    #[serde(alias = "Fifo", alias = "fifo")]
    Fifo,
    /// Random replacement policy.
    #[serde(alias = "Random", alias = "random")]
    Random,
}

impl FromStr for ReplacementPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "plru" => Ok(Self::Plru),
            "fifo" => Ok(Self::Fifo),
            "random" => Ok(Self::Random),
            _ => Err(ConfigError::UnknownPolicy(s.to_owned())),
        }
    }
}

/// Directory sharer-tracking organisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryType {
    /// Exact sharer set of unbounded size.
    #[default]
    #[serde(alias = "FullMap")]
    FullMap,
    /// At most `max_hw_sharers` sharers; adding one more first invalidates an existing sharer.
    #[serde(alias = "LimitedNoBroadcast")]
    LimitedNoBroadcast,
    /// Beyond `max_hw_sharers` sharers the entry switches to broadcast invalidation.
    #[serde(alias = "LimitedBroadcast")]
    LimitedBroadcast,
}

impl FromStr for DirectoryType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "full_map" | "fullmap" => Ok(Self::FullMap),
            "limited_no_broadcast" | "limitednobroadcast" => Ok(Self::LimitedNoBroadcast),
            "limited_broadcast" | "limitedbroadcast" => Ok(Self::LimitedBroadcast),
            _ => Err(ConfigError::UnknownDirectoryType(s.to_owned())),
        }
    }
}

/// Backing-store latency model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum MemoryController {
    /// Every access takes the same number of cycles.
    #[default]
    #[serde(alias = "simple")]
    Simple,
    /// Row-buffer model with CAS, RAS and precharge latencies.
    #[serde(alias = "DRAM", alias = "dram")]
    Dram,
}

impl FromStr for MemoryController {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "dram" => Ok(Self::Dram),
            _ => Err(ConfigError::UnknownController(s.to_owned())),
        }
    }
}

/// Root configuration structure.
///
/// # Examples
///
/// ```
/// use cohsim_core::config::{Config, Protocol, ReplacementPolicy};
///
/// let json = r#"{
///     "general": { "num_cores": 4 },
///     "cache": {
///         "l1_d": { "size_bytes": 16384, "ways": 4, "policy": "PLRU" },
///         "l2": { "size_bytes": 131072, "ways": 8 }
///     },
///     "directory": { "protocol": "mesif", "type": "limited_broadcast", "max_hw_sharers": 2 }
/// }"#;
///
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.general.num_cores, 4);
/// assert_eq!(config.cache.l1_d.policy, ReplacementPolicy::Plru);
/// assert_eq!(config.directory.protocol, Protocol::Mesif);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Core count and line size
    #[serde(default)]
    pub general: GeneralConfig,
    /// Cache hierarchy configuration
    #[serde(default)]
    pub cache: CacheHierarchyConfig,
    /// Directory and protocol configuration
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Coherence transport configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Backing-store configuration
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl Config {
    /// Parses and validates a JSON configuration.
    ///
    /// # Arguments
    ///
    /// * `json` - Configuration text; absent fields take their defaults.
    ///
    /// # Returns
    ///
    /// The validated configuration, or the first problem found.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Enabled levels beyond the first, innermost first.
    pub fn outer_levels(&self) -> Vec<(&'static str, &CacheConfig)> {
        let mut levels = vec![("L2", &self.cache.l2)];
        if self.cache.l3.enabled {
            levels.push(("L3", &self.cache.l3));
        }
        levels
    }

    /// Number of last-level cache instances (coherence nodes).
    pub fn num_nodes(&self) -> usize {
        let shared = self
            .outer_levels()
            .last()
            .map_or(1, |(_, level)| level.shared_cores.max(1));
        self.general.num_cores / shared
    }

    /// Checks geometry, core sharing and directory settings for consistency.
    ///
    /// # Returns
    ///
    /// `Ok(())` if a memory system can be built from this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cores = self.general.num_cores;
        let line = self.general.line_bytes;
        if cores == 0 {
            return Err(ConfigError::Zero("general.num_cores"));
        }
        if !line.is_power_of_two() || !(8..=512).contains(&line) {
            return Err(ConfigError::LineSize(line));
        }
        if !self.cache.l1_d.enabled {
            return Err(ConfigError::MissingLevel("L1-D"));
        }
        if !self.cache.l2.enabled {
            return Err(ConfigError::MissingLevel("L2"));
        }

        let mut first_levels = vec![("L1-D", &self.cache.l1_d)];
        if self.cache.l1_i.enabled {
            first_levels.push(("L1-I", &self.cache.l1_i));
        }
        for &(name, level) in first_levels.iter().chain(self.outer_levels().iter()) {
            level.check(name, line, cores)?;
        }

        // Each level must be shared by a multiple of the cores sharing the level before it.
        let mut inner = first_levels
            .iter()
            .map(|(_, level)| level.shared_cores)
            .max()
            .unwrap_or(1);
        for (name, level) in self.outer_levels() {
            if level.shared_cores % inner != 0 {
                return Err(ConfigError::Sharing {
                    cache: name,
                    shared: level.shared_cores,
                    detail: format!("inner levels shared by {inner} cores"),
                });
            }
            let fan_in = (level.shared_cores / inner) * first_levels.len();
            if fan_in > 64 {
                return Err(ConfigError::Sharing {
                    cache: name,
                    shared: level.shared_cores,
                    detail: format!("{fan_in} inner caches (at most 64 are tracked)"),
                });
            }
            inner = level.shared_cores;
        }

        let nodes = self.num_nodes();
        let dir = &self.directory;
        if !dir.enabled {
            if nodes > 1 {
                return Err(ConfigError::DirectoryRequired(nodes));
            }
            return Ok(());
        }
        if dir.homes == 0 {
            return Err(ConfigError::Zero("directory.homes"));
        }
        if dir.max_hw_sharers == 0 {
            return Err(ConfigError::Zero("directory.max_hw_sharers"));
        }
        if dir.associativity == 0 || dir.total_entries == 0 || dir.total_entries % dir.associativity != 0 {
            return Err(ConfigError::DirectoryGeometry {
                total: dir.total_entries,
                assoc: dir.associativity,
            });
        }
        Ok(())
    }
}

/// Core count and line size.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Number of simulated cores
    #[serde(default = "GeneralConfig::default_num_cores")]
    pub num_cores: usize,

    /// Cache line size in bytes, shared by every level and the directory
    #[serde(default = "GeneralConfig::default_line_bytes")]
    pub line_bytes: usize,
}

impl GeneralConfig {
    fn default_num_cores() -> usize {
        defaults::NUM_CORES
    }

    fn default_line_bytes() -> usize {
        defaults::LINE_BYTES
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            num_cores: defaults::NUM_CORES,
            line_bytes: defaults::LINE_BYTES,
        }
    }
}

/// Cache hierarchy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheHierarchyConfig {
    /// L1 instruction cache (optional)
    #[serde(default = "CacheHierarchyConfig::default_l1_i")]
    pub l1_i: CacheConfig,
    /// L1 data cache
    #[serde(default = "CacheHierarchyConfig::default_l1_d")]
    pub l1_d: CacheConfig,
    /// Unified L2 cache
    #[serde(default = "CacheHierarchyConfig::default_l2")]
    pub l2: CacheConfig,
    /// Unified L3 cache (optional)
    #[serde(default = "CacheHierarchyConfig::default_l3")]
    pub l3: CacheConfig,
}

impl CacheHierarchyConfig {
    fn default_l1_i() -> CacheConfig {
        CacheConfig::sized(defaults::L1_SIZE, defaults::L1_WAYS, defaults::L1_DATA_LATENCY)
    }

    fn default_l1_d() -> CacheConfig {
        CacheConfig::sized(defaults::L1_SIZE, defaults::L1_WAYS, defaults::L1_DATA_LATENCY)
    }

    fn default_l2() -> CacheConfig {
        CacheConfig::sized(defaults::L2_SIZE, defaults::L2_WAYS, defaults::L2_DATA_LATENCY)
    }

    fn default_l3() -> CacheConfig {
        CacheConfig {
            enabled: false,
            ..CacheConfig::sized(defaults::L3_SIZE, defaults::L3_WAYS, defaults::L3_DATA_LATENCY)
        }
    }
}

impl Default for CacheHierarchyConfig {
    fn default() -> Self {
        Self {
            l1_i: Self::default_l1_i(),
            l1_d: Self::default_l1_d(),
            l2: Self::default_l2(),
            l3: Self::default_l3(),
        }
    }
}

/// Individual cache level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Enable this cache level
    #[serde(default = "CacheConfig::default_enabled")]
    pub enabled: bool,

    /// Total cache size in bytes
    #[serde(default = "CacheConfig::default_size")]
    pub size_bytes: usize,

    /// Associativity (number of ways)
    #[serde(default = "CacheConfig::default_ways")]
    pub ways: usize,

    /// Replacement policy
    #[serde(default)]
    pub policy: ReplacementPolicy,

    /// Data access latency in cycles (charged on hits)
    #[serde(default = "CacheConfig::default_data_latency")]
    pub data_latency: u64,

    /// Tag lookup latency in cycles (charged on misses and snoops)
    #[serde(default = "CacheConfig::default_tags_latency")]
    pub tags_latency: u64,

    /// Cycles to push dirty data to the next level
    #[serde(default = "CacheConfig::default_writeback_latency")]
    pub writeback_latency: u64,

    /// Number of cores sharing one instance of this level
    #[serde(default = "CacheConfig::default_shared_cores")]
    pub shared_cores: usize,

    /// Whether the level takes part in coherence; a non-coherent level may not drop dirty data
    #[serde(default = "CacheConfig::default_enabled")]
    pub coherent: bool,

    /// Every access hits (lines are installed on demand)
    #[serde(default)]
    pub perfect: bool,

    /// Entries kept in the outstanding-miss table
    #[serde(default = "CacheConfig::default_mshr_entries")]
    pub mshr_entries: usize,

    /// Concurrent misses the level can have in flight (0 = unlimited)
    #[serde(default)]
    pub outstanding_misses: usize,
}

impl CacheConfig {
    fn sized(size_bytes: usize, ways: usize, data_latency: u64) -> Self {
        Self {
            size_bytes,
            ways,
            data_latency,
            ..Self::default()
        }
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_size() -> usize {
        defaults::L1_SIZE
    }

    fn default_ways() -> usize {
        defaults::L1_WAYS
    }

    fn default_data_latency() -> u64 {
        defaults::L1_DATA_LATENCY
    }

    fn default_tags_latency() -> u64 {
        defaults::TAGS_LATENCY
    }

    fn default_writeback_latency() -> u64 {
        defaults::WRITEBACK_LATENCY
    }

    fn default_shared_cores() -> usize {
        1
    }

    fn default_mshr_entries() -> usize {
        defaults::MSHR_ENTRIES
    }

    /// Number of sets for the given line size.
    pub const fn num_sets(&self, line_bytes: usize) -> usize {
        if self.ways == 0 || line_bytes == 0 {
            return 0;
        }
        self.size_bytes / (self.ways * line_bytes)
    }

    fn check(&self, name: &'static str, line: usize, cores: usize) -> Result<(), ConfigError> {
        let sets = self.num_sets(line);
        if self.ways == 0
            || sets == 0
            || !sets.is_power_of_two()
            || sets * self.ways * line != self.size_bytes
            || self.ways > 64
        {
            return Err(ConfigError::Geometry {
                cache: name,
                size: self.size_bytes,
                ways: self.ways,
                line,
            });
        }
        if self.shared_cores == 0 || cores % self.shared_cores != 0 {
            return Err(ConfigError::Sharing {
                cache: name,
                shared: self.shared_cores,
                detail: format!("{cores} cores"),
            });
        }
        if self.mshr_entries == 0 {
            return Err(ConfigError::Zero("mshr_entries"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    /// Creates a default cache configuration.
    ///
    /// The level is enabled, private to one core, coherent, 32 KiB 8-way with LRU replacement.
    fn default() -> Self {
        Self {
            enabled: true,
            size_bytes: defaults::L1_SIZE,
            ways: defaults::L1_WAYS,
            policy: ReplacementPolicy::default(),
            data_latency: defaults::L1_DATA_LATENCY,
            tags_latency: defaults::TAGS_LATENCY,
            writeback_latency: defaults::WRITEBACK_LATENCY,
            shared_cores: 1,
            coherent: true,
            perfect: false,
            mshr_entries: defaults::MSHR_ENTRIES,
            outstanding_misses: 0,
        }
    }
}

/// Directory and protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoryConfig {
    /// Keep last-level caches coherent through a directory; disabled means direct-DRAM mode
    #[serde(default = "DirectoryConfig::default_enabled")]
    pub enabled: bool,

    /// Coherence protocol variant
    #[serde(default)]
    pub protocol: Protocol,

    /// Sharer-tracking organisation
    #[serde(default, rename = "type")]
    pub kind: DirectoryType,

    /// Directory entries per home
    #[serde(default = "DirectoryConfig::default_entries")]
    pub total_entries: usize,

    /// Directory associativity
    #[serde(default = "DirectoryConfig::default_assoc")]
    pub associativity: usize,

    /// Sharers a limited entry tracks exactly
    #[serde(default = "DirectoryConfig::default_max_hw_sharers")]
    pub max_hw_sharers: usize,

    /// Directory lookup latency in cycles
    #[serde(default = "DirectoryConfig::default_latency")]
    pub access_latency: u64,

    /// Number of home shards; lines are interleaved across homes
    #[serde(default = "DirectoryConfig::default_homes")]
    pub homes: usize,
}

impl DirectoryConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_entries() -> usize {
        defaults::DIR_ENTRIES
    }

    fn default_assoc() -> usize {
        defaults::DIR_ASSOC
    }

    fn default_max_hw_sharers() -> usize {
        defaults::MAX_HW_SHARERS
    }

    fn default_latency() -> u64 {
        defaults::DIR_LATENCY
    }

    fn default_homes() -> usize {
        defaults::DIR_HOMES
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protocol: Protocol::default(),
            kind: DirectoryType::default(),
            total_entries: defaults::DIR_ENTRIES,
            associativity: defaults::DIR_ASSOC,
            max_hw_sharers: defaults::MAX_HW_SHARERS,
            access_latency: defaults::DIR_LATENCY,
            homes: defaults::DIR_HOMES,
        }
    }
}

/// Coherence transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// One-way latency added to every message, in cycles
    #[serde(default = "NetworkConfig::default_hop_latency")]
    pub hop_latency: u64,
}

impl NetworkConfig {
    fn default_hop_latency() -> u64 {
        defaults::HOP_LATENCY
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hop_latency: defaults::HOP_LATENCY,
        }
    }
}

/// Backing-store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    /// Latency model
    #[serde(default)]
    pub controller: MemoryController,

    /// Fixed latency for the simple controller
    #[serde(default = "MemoryConfig::default_latency")]
    pub latency: u64,

    /// CAS latency for the DRAM controller
    #[serde(default = "MemoryConfig::default_t_cas")]
    pub t_cas: u64,

    /// RAS latency for the DRAM controller
    #[serde(default = "MemoryConfig::default_t_ras")]
    pub t_ras: u64,

    /// Precharge latency for the DRAM controller
    #[serde(default = "MemoryConfig::default_t_pre")]
    pub t_pre: u64,
}

impl MemoryConfig {
    fn default_latency() -> u64 {
        defaults::MEM_LATENCY
    }

    fn default_t_cas() -> u64 {
        defaults::T_CAS
    }

    fn default_t_ras() -> u64 {
        defaults::T_RAS
    }

    fn default_t_pre() -> u64 {
        defaults::T_PRE
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            controller: MemoryController::default(),
            latency: defaults::MEM_LATENCY,
            t_cas: defaults::T_CAS,
            t_ras: defaults::T_RAS,
            t_pre: defaults::T_PRE,
        }
    }
}
