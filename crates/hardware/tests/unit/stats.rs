//! # Statistics Tests
//!
//! The bundled table sink and the counter keys a full system reports.

use cohsim_core::coherence::{CacheState, Transition};
use cohsim_core::common::CacheLevel;
use cohsim_core::config::Protocol;
use cohsim_core::stats::{StatRow, StatsSink, StatsTable};
use pretty_assertions::assert_eq;

use crate::common::harness::{build, line, read_u64, small_config, write_u64};

// ══════════════════════════════════════════════════════════
// 1. Table sink
// ══════════════════════════════════════════════════════════

#[test]
fn table_lookup_and_sum() {
    let mut table = StatsTable::new();
    table.record("L2", 0, "loads", 3);
    table.record("L2", 1, "loads", 4);
    table.record("L2", 1, "stores", 9);
    table.record("L2", 1, "loads", 5);

    assert_eq!(table.get("L2", 1, "loads"), Some(5));
    assert_eq!(table.get("L2", 2, "loads"), None);
    assert_eq!(table.sum("L2", "loads"), 8);
    assert_eq!(table.sum("L1-D", "loads"), 0);
}

#[test]
fn rows_are_sorted_by_component_instance_metric() {
    let mut table = StatsTable::new();
    table.record("network", 0, "EX_REQ", 1);
    table.record("L2", 1, "loads", 2);
    table.record("L2", 0, "stores", 3);
    table.record("L2", 0, "loads", 4);

    let keys: Vec<(String, usize, String)> = table
        .rows()
        .into_iter()
        .map(|r| (r.component, r.instance, r.metric))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("L2".to_owned(), 0, "loads".to_owned()),
            ("L2".to_owned(), 0, "stores".to_owned()),
            ("L2".to_owned(), 1, "loads".to_owned()),
            ("network".to_owned(), 0, "EX_REQ".to_owned()),
        ]
    );
}

#[test]
fn json_export_lists_every_row() {
    let mut table = StatsTable::new();
    table.record("directory", 0, "dram-reads", 7);
    let json = table.to_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(
        parsed,
        serde_json::json!([
            { "component": "directory", "instance": 0, "metric": "dram-reads", "value": 7 }
        ])
    );
    assert_eq!(
        table.rows(),
        vec![StatRow {
            component: "directory".to_owned(),
            instance: 0,
            metric: "dram-reads".to_owned(),
            value: 7,
        }]
    );
}

// ══════════════════════════════════════════════════════════
// 2. System report
// ══════════════════════════════════════════════════════════

#[test]
fn report_covers_caches_directory_network_and_cores() {
    let mut system = build(&small_config(2, Protocol::Mesi));
    write_u64(&mut system, 0, line(0), 5);
    assert_eq!(read_u64(&mut system, 1, line(0)), 5);

    let mut table = StatsTable::new();
    system.report(&mut table);

    assert_eq!(table.get("L1-D", 0, "stores"), Some(1));
    assert_eq!(table.get("L1-D", 0, "store-misses"), Some(1));
    assert_eq!(table.get("L1-D", 1, "loads"), Some(1));
    assert_eq!(table.get("L1-D", 1, "load-misses-I"), Some(1));
    assert_eq!(table.get("L1-D", 0, "coherency-downgrades").map(|v| v > 0), Some(true));
    assert_eq!(table.get("directory", 0, "ex-reqs"), Some(1));
    assert_eq!(table.get("directory", 0, "sh-reqs"), Some(1));
    assert_eq!(table.get("directory", 0, "writebacks"), Some(1));
    assert_eq!(table.get("network", 0, "EX_REQ"), Some(1));
    assert_eq!(table.get("network", 0, "WB_REP"), Some(1));
    assert_eq!(table.sum("network", "data-messages"), 3);
    assert!(table.get("core", 0, "time").unwrap() > 0);
    assert!(table.get("core", 1, "time").unwrap() > 0);
    assert_eq!(table.get("L1-I", 0, "loads"), None);
}

#[test]
fn transition_matrix_is_reported_by_reason() {
    let mut system = build(&small_config(1, Protocol::Mesi));
    let _ = read_u64(&mut system, 0, line(0));

    let l1 = system.cache_for(0, CacheLevel::L1D).unwrap();
    assert_eq!(
        l1.stats()
            .transition_count(Transition::CoreRd, CacheState::Invalid, CacheState::Shared),
        1
    );
    let l2 = system.cache_for(0, CacheLevel::L2).unwrap();
    assert_eq!(
        l2.stats()
            .transition_count(Transition::CoreRd, CacheState::Invalid, CacheState::Exclusive),
        1
    );

    let mut table = StatsTable::new();
    system.report(&mut table);
    assert_eq!(table.get("L1-D", 0, "transition-core-rd-IS"), Some(1));
    assert_eq!(table.get("L2", 0, "transition-core-rd-IE"), Some(1));
    assert_eq!(table.get("L2", 0, "transition-core-wr-IM"), None);
}
