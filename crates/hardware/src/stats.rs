//! Statistics collection and reporting.
//!
//! Controllers keep plain counters; nothing is registered globally. This module provides:
//! 1. **Cache counters:** Loads, stores and their misses per line state, evictions, coherency
//!    actions, latency totals and the per-reason transition matrix (`CacheStats`).
//! 2. **Directory counters:** Requests, invalidations, forwards, nullifications (`DirectoryStats`).
//! 3. **Sinks:** `StatsSink`, the explicit interface counters are pushed into, and `StatsTable`,
//!    the bundled sink that prints section tables and serializes to JSON.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::coherence::{CacheState, Transition};

/// Receiver of named counters.
pub trait StatsSink {
    /// Records one counter.
    ///
    /// # Arguments
    ///
    /// * `component` - Component name, e.g. `L1-D`, `directory`, `network`.
    /// * `instance` - Instance index within the component.
    /// * `metric` - Counter name.
    /// * `value` - Counter value.
    fn record(&mut self, component: &str, instance: usize, metric: &str, value: u64);
}

/// Counters of one cache controller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Demand loads (including read-exclusive).
    pub loads: u64,
    /// Demand stores.
    pub stores: u64,
    /// Loads that missed.
    pub load_misses: u64,
    /// Stores that missed (including upgrades of shared lines).
    pub store_misses: u64,
    /// Loads by line state at access time.
    pub loads_state: [u64; CacheState::COUNT],
    /// Stores by line state at access time.
    pub stores_state: [u64; CacheState::COUNT],
    /// Load misses by line state at access time.
    pub load_misses_state: [u64; CacheState::COUNT],
    /// Store misses by line state at access time.
    pub store_misses_state: [u64; CacheState::COUNT],
    /// Hits on a line whose miss was still completing.
    pub overlapping: u64,
    /// Prefetch requests that reached this level.
    pub prefetches: u64,
    /// First demand hits on prefetched lines.
    pub hits_prefetch: u64,
    /// Demand hits on lines installed by warmup accesses.
    pub hits_warmup: u64,
    /// Lines evicted.
    pub evictions: u64,
    /// Prefetched lines evicted without a demand hit.
    pub evict_prefetch: u64,
    /// Modified lines evicted.
    pub evict_modified: u64,
    /// Shared lines evicted.
    pub evict_shared: u64,
    /// 8-byte words touched in evicted lines.
    pub words_used: u64,
    /// Lines downgraded to shared on behalf of another requester.
    pub coherency_downgrades: u64,
    /// Shared lines upgraded through the protocol.
    pub coherency_upgrades: u64,
    /// Lines invalidated on behalf of another requester.
    pub coherency_invalidates: u64,
    /// Dirty lines written back on behalf of another requester.
    pub coherency_writebacks: u64,
    /// Exclusive lines promoted to modified without a protocol round trip.
    pub silent_upgrades: u64,
    /// Lines invalidated because the next level evicted them.
    pub back_invalidates: u64,
    /// Cycles charged to accesses entering here.
    pub total_latency: u64,
    /// Cycles spent waiting on the directory.
    pub snoop_latency: u64,
    /// Cycles charged for overlapping accesses.
    pub mshr_latency: u64,
    /// State changes indexed by reason, old state and new state.
    pub transitions: [[[u64; CacheState::COUNT]; CacheState::COUNT]; Transition::COUNT],
}

impl CacheStats {
    /// Counts one state change.
    pub const fn record_transition(&mut self, reason: Transition, old: CacheState, new: CacheState) {
        self.transitions[reason.index()][old.index()][new.index()] += 1;
    }

    /// State changes for one reason and state pair.
    pub const fn transition_count(&self, reason: Transition, old: CacheState, new: CacheState) -> u64 {
        self.transitions[reason.index()][old.index()][new.index()]
    }

    /// Pushes every counter into a sink.
    pub fn report(&self, component: &str, instance: usize, sink: &mut dyn StatsSink) {
        let scalars = [
            ("loads", self.loads),
            ("stores", self.stores),
            ("load-misses", self.load_misses),
            ("store-misses", self.store_misses),
            ("overlapping", self.overlapping),
            ("prefetches", self.prefetches),
            ("hits-prefetch", self.hits_prefetch),
            ("hits-warmup", self.hits_warmup),
            ("evictions", self.evictions),
            ("evict-prefetch", self.evict_prefetch),
            ("evict-modified", self.evict_modified),
            ("evict-shared", self.evict_shared),
            ("words-used", self.words_used),
            ("coherency-downgrades", self.coherency_downgrades),
            ("coherency-upgrades", self.coherency_upgrades),
            ("coherency-invalidates", self.coherency_invalidates),
            ("coherency-writebacks", self.coherency_writebacks),
            ("silent-upgrades", self.silent_upgrades),
            ("back-invalidates", self.back_invalidates),
            ("total-latency", self.total_latency),
            ("snoop-latency", self.snoop_latency),
            ("mshr-latency", self.mshr_latency),
        ];
        for (metric, value) in scalars {
            sink.record(component, instance, metric, value);
        }

        for state in CacheState::ALL {
            let i = state.index();
            let l = state.letter();
            for (prefix, counts) in [
                ("loads", &self.loads_state),
                ("stores", &self.stores_state),
                ("load-misses", &self.load_misses_state),
                ("store-misses", &self.store_misses_state),
            ] {
                if counts[i] != 0 {
                    sink.record(component, instance, &format!("{prefix}-{l}"), counts[i]);
                }
            }
        }

        for reason in Transition::ALL {
            for old in CacheState::ALL {
                for new in CacheState::ALL {
                    let n = self.transition_count(reason, old, new);
                    if n != 0 {
                        let metric = format!("transition-{}-{}{}", reason.name(), old.letter(), new.letter());
                        sink.record(component, instance, &metric, n);
                    }
                }
            }
        }
    }
}

/// Counters of one directory home.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryStats {
    /// Exclusive requests received.
    pub ex_reqs: u64,
    /// Shared requests received.
    pub sh_reqs: u64,
    /// Upgrade requests received.
    pub upgrade_reqs: u64,
    /// Upgrades whose requester no longer held the line or whose line changed state.
    pub upgrade_fallbacks: u64,
    /// Invalidation requests sent.
    pub invalidations: u64,
    /// Invalidation rounds sent to every node.
    pub broadcasts: u64,
    /// Flush requests sent.
    pub flushes: u64,
    /// Write-back requests sent to owners.
    pub writebacks: u64,
    /// Shared requests forwarded to a forwarder.
    pub forwards: u64,
    /// Forwarded requests the forwarder served.
    pub forward_hits: u64,
    /// Forwarded requests that fell back to the backing store.
    pub forward_failures: u64,
    /// Sharers invalidated to make room in a limited entry.
    pub sharer_evictions: u64,
    /// Entries evicted from the directory cache.
    pub entry_evictions: u64,
    /// Nullify transactions completed.
    pub nullifies: u64,
    /// Requests deferred because every entry of their set was busy.
    pub set_stalls: u64,
    /// Backing-store reads.
    pub dram_reads: u64,
    /// Backing-store writes.
    pub dram_writes: u64,
}

impl DirectoryStats {
    /// Pushes every counter into a sink.
    pub fn report(&self, instance: usize, sink: &mut dyn StatsSink) {
        let counters = [
            ("ex-reqs", self.ex_reqs),
            ("sh-reqs", self.sh_reqs),
            ("upgrade-reqs", self.upgrade_reqs),
            ("upgrade-fallbacks", self.upgrade_fallbacks),
            ("invalidations", self.invalidations),
            ("broadcasts", self.broadcasts),
            ("flushes", self.flushes),
            ("writebacks", self.writebacks),
            ("forwards", self.forwards),
            ("forward-hits", self.forward_hits),
            ("forward-failures", self.forward_failures),
            ("sharer-evictions", self.sharer_evictions),
            ("entry-evictions", self.entry_evictions),
            ("nullifies", self.nullifies),
            ("set-stalls", self.set_stalls),
            ("dram-reads", self.dram_reads),
            ("dram-writes", self.dram_writes),
        ];
        for (metric, value) in counters {
            sink.record("directory", instance, metric, value);
        }
    }
}

/// One row of a [`StatsTable`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatRow {
    /// Component name.
    pub component: String,
    /// Instance index.
    pub instance: usize,
    /// Counter name.
    pub metric: String,
    /// Counter value.
    pub value: u64,
}

/// Sorted in-memory sink.
#[derive(Clone, Debug, Default)]
pub struct StatsTable {
    rows: BTreeMap<(String, usize, String), u64>,
}

impl StatsSink for StatsTable {
    fn record(&mut self, component: &str, instance: usize, metric: &str, value: u64) {
        let _ = self
            .rows
            .insert((component.to_owned(), instance, metric.to_owned()), value);
    }
}

impl StatsTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of one counter.
    pub fn get(&self, component: &str, instance: usize, metric: &str) -> Option<u64> {
        self.rows
            .get(&(component.to_owned(), instance, metric.to_owned()))
            .copied()
    }

    /// Sum of a counter over every instance of a component.
    pub fn sum(&self, component: &str, metric: &str) -> u64 {
        self.rows
            .iter()
            .filter(|((c, _, m), _)| c == component && m == metric)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Rows in sorted order.
    pub fn rows(&self) -> Vec<StatRow> {
        self.rows
            .iter()
            .map(|((component, instance, metric), &value)| StatRow {
                component: component.clone(),
                instance: *instance,
                metric: metric.clone(),
                value,
            })
            .collect()
    }

    /// Serializes the rows as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.rows())
    }

    /// Prints every section to stdout.
    ///
    /// Each component instance gets its own section; zero counters are skipped.
    pub fn print(&self) {
        println!("\n==========================================================");
        println!("COHERENCE ENGINE STATISTICS");
        println!("==========================================================");
        let mut current: Option<(&str, usize)> = None;
        for ((component, instance, metric), value) in &self.rows {
            if *value == 0 {
                continue;
            }
            if current != Some((component.as_str(), *instance)) {
                if current.is_some() {
                    println!("----------------------------------------------------------");
                }
                println!("{component}[{instance}]");
                current = Some((component.as_str(), *instance));
            }
            println!("  {metric:<28} {value}");
        }
        println!("==========================================================");
    }
}
