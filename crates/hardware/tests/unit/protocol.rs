//! # Protocol Scenario Tests
//!
//! Whole-system transactions checked three ways: the messages delivered, the resulting cache
//! and directory states, and the values cores read back.

use cohsim_core::coherence::{CacheState, DirectoryState, Endpoint, HitWhere, MsgType};
use cohsim_core::common::{CacheLevel, MemOp, NodeId, Port};
use cohsim_core::config::{DirectoryType, Protocol};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::harness::{assert_coherent, build, direct_config, line, msg_types, read_u64, small_config, write_u64};

use cohsim_core::coherence::MsgType::{ExRep, ExReq, FlushRep, FlushReq, InvRep, InvReq, ShRep, ShReq, UpgradeRep, UpgradeReq, WbRep, WbReq};

// ══════════════════════════════════════════════════════════
// 1. Single-node transactions
// ══════════════════════════════════════════════════════════

#[rstest]
#[case(Protocol::Msi)]
#[case(Protocol::Mesi)]
#[case(Protocol::Mesif)]
fn write_miss_takes_ownership(#[case] protocol: Protocol) {
    let mut system = build(&small_config(2, protocol));
    let a = line(0);
    system.enable_message_trace();
    let result = system.write(0, a, &7u64.to_le_bytes());

    assert_eq!(msg_types(&system.take_message_trace()), vec![ExReq, ExRep]);
    assert_eq!(result.hit_where, HitWhere::Dram);
    assert_eq!(system.line_state(0, CacheLevel::L2, a), CacheState::Modified);
    assert_eq!(system.line_state(0, CacheLevel::L1D, a), CacheState::Modified);
    let entry = system.directory_entry(a).unwrap();
    assert_eq!(entry.state(), DirectoryState::Modified);
    assert_eq!(entry.owner(), Some(NodeId(0)));
    assert_coherent(&system);
}

/// Only the last level is granted the clean-exclusive state; inner levels hold SHARED.
#[rstest]
#[case(Protocol::Msi, CacheState::Shared, DirectoryState::Shared, ShRep)]
#[case(Protocol::Mesi, CacheState::Exclusive, DirectoryState::Exclusive, ExRep)]
#[case(Protocol::Mesif, CacheState::Exclusive, DirectoryState::Exclusive, ExRep)]
fn read_miss_fill_state(
    #[case] protocol: Protocol,
    #[case] llc: CacheState,
    #[case] dir: DirectoryState,
    #[case] reply: MsgType,
) {
    let mut system = build(&small_config(2, protocol));
    let a = line(1);
    system.enable_message_trace();
    assert_eq!(read_u64(&mut system, 0, a), 0);

    assert_eq!(msg_types(&system.take_message_trace()), vec![ShReq, reply]);
    assert_eq!(system.line_state(0, CacheLevel::L2, a), llc);
    assert_eq!(system.line_state(0, CacheLevel::L1D, a), CacheState::Shared);
    assert_eq!(system.directory_entry(a).map(|e| e.state()), Some(dir));
    assert_coherent(&system);
}

#[test]
fn repeat_access_hits_first_level_without_messages() {
    let mut system = build(&small_config(2, Protocol::Mesi));
    let a = line(2);
    write_u64(&mut system, 0, a, 1);
    system.enable_message_trace();
    let mut buf = [0u8; 8];
    let hit = system.read(0, a, &mut buf);
    assert_eq!(hit.hit_where, HitWhere::Cache(CacheLevel::L1D));
    assert!(system.take_message_trace().is_empty());
    assert_eq!(u64::from_le_bytes(buf), 1);
}

/// An exclusive-clean line turns MODIFIED on a write without asking anyone.
#[test]
fn exclusive_line_upgrades_silently() {
    let mut system = build(&small_config(2, Protocol::Mesi));
    let a = line(3);
    let _ = read_u64(&mut system, 0, a);
    system.enable_message_trace();
    write_u64(&mut system, 0, a, 99);

    assert!(system.take_message_trace().is_empty());
    assert_eq!(system.line_state(0, CacheLevel::L2, a), CacheState::Modified);
    let l2 = system.cache_for(0, CacheLevel::L2).unwrap();
    assert_eq!(l2.stats().silent_upgrades, 1);
    assert_coherent(&system);
}

#[test]
fn msi_sole_sharer_upgrade_is_granted_directly() {
    let mut system = build(&small_config(2, Protocol::Msi));
    let a = line(4);
    let _ = read_u64(&mut system, 0, a);
    system.enable_message_trace();
    let result = system.write(0, a, &[1]);

    assert_eq!(msg_types(&system.take_message_trace()), vec![UpgradeReq, UpgradeRep]);
    assert_eq!(result.hit_where, HitWhere::Remote);
    assert_eq!(system.line_state(0, CacheLevel::L2, a), CacheState::Modified);
    let l2 = system.cache_for(0, CacheLevel::L2).unwrap();
    assert_eq!(l2.stats().coherency_upgrades, 1);
    assert_coherent(&system);
}

// ══════════════════════════════════════════════════════════
// 2. Two-node sharing
// ══════════════════════════════════════════════════════════

/// A reader of a remotely modified line gets the owner's bytes; the owner keeps a SHARED copy.
#[rstest]
#[case(Protocol::Msi)]
#[case(Protocol::Mesi)]
#[case(Protocol::Mesif)]
fn reader_pulls_dirty_line_from_owner(#[case] protocol: Protocol) {
    let mut system = build(&small_config(2, protocol));
    let a = line(5);
    write_u64(&mut system, 0, a, 0xfeed);
    system.enable_message_trace();

    let mut buf = [0u8; 8];
    let result = system.read(1, a, &mut buf);
    assert_eq!(u64::from_le_bytes(buf), 0xfeed);
    assert_eq!(result.hit_where, HitWhere::Remote);
    assert_eq!(msg_types(&system.take_message_trace()), vec![ShReq, WbReq, WbRep, ShRep]);

    for core in 0..2 {
        assert_eq!(system.line_state(core, CacheLevel::L2, a), CacheState::Shared);
    }
    assert_eq!(system.line_state(0, CacheLevel::L1D, a), CacheState::Shared);
    let entry = system.directory_entry(a).unwrap();
    assert_eq!(entry.state(), DirectoryState::Shared);
    assert_eq!(entry.sharers().collect::<Vec<_>>(), vec![NodeId(0), NodeId(1)]);
    let stats = system.directories()[0].stats();
    assert_eq!(stats.writebacks, 1);
    assert_eq!(stats.dram_writes, 1);
    assert_eq!(stats.dram_reads, 1);
    assert_coherent(&system);
}

#[test]
fn write_to_shared_line_invalidates_other_sharer() {
    let mut system = build(&small_config(2, Protocol::Mesi));
    let a = line(6);
    write_u64(&mut system, 0, a, 1);
    let _ = read_u64(&mut system, 1, a);
    system.enable_message_trace();
    write_u64(&mut system, 0, a, 2);

    let trace = system.take_message_trace();
    assert_eq!(msg_types(&trace), vec![UpgradeReq, InvReq, InvRep, UpgradeRep]);
    assert_eq!(trace[1].receiver, Endpoint::Cache(NodeId(1)));
    assert_eq!(system.line_state(1, CacheLevel::L2, a), CacheState::Invalid);
    assert_eq!(system.line_state(1, CacheLevel::L1D, a), CacheState::Invalid);
    assert_eq!(system.line_state(0, CacheLevel::L2, a), CacheState::Modified);
    assert_eq!(system.cache_for(1, CacheLevel::L2).unwrap().stats().coherency_invalidates, 1);
    assert_coherent(&system);

    assert_eq!(read_u64(&mut system, 1, a), 2);
}

/// Writers alternate: each write flushes the line out of the other node.
#[test]
fn write_ping_pong_flushes_owner() {
    let mut system = build(&small_config(2, Protocol::Mesi));
    let a = line(7);
    write_u64(&mut system, 0, a, 10);
    system.enable_message_trace();
    write_u64(&mut system, 1, a + 8, 20);

    assert_eq!(msg_types(&system.take_message_trace()), vec![ExReq, FlushReq, FlushRep, ExRep]);
    assert_eq!(system.line_state(0, CacheLevel::L2, a), CacheState::Invalid);
    assert_eq!(system.line_state(1, CacheLevel::L2, a), CacheState::Modified);
    assert_eq!(system.directories()[0].stats().flushes, 1);
    assert_eq!(system.directories()[0].stats().dram_writes, 0);

    write_u64(&mut system, 0, a + 16, 30);
    assert_eq!(read_u64(&mut system, 0, a), 10);
    assert_eq!(read_u64(&mut system, 0, a + 8), 20);
    assert_eq!(read_u64(&mut system, 0, a + 16), 30);
    assert_coherent(&system);
}

// ══════════════════════════════════════════════════════════
// 3. MESIF forwarding
// ══════════════════════════════════════════════════════════

/// The newest sharer forwards; a third reader is served by it instead of the backing store.
#[test]
fn mesif_forwarder_supplies_next_reader() {
    let mut system = build(&small_config(3, Protocol::Mesif));
    let a = line(8);
    let _ = read_u64(&mut system, 0, a);
    let _ = read_u64(&mut system, 1, a);
    assert_eq!(system.directory_entry(a).and_then(|e| e.forwarder()), Some(NodeId(1)));

    system.enable_message_trace();
    let mut buf = [0u8; 8];
    let result = system.read(2, a, &mut buf);
    let trace = system.take_message_trace();
    assert_eq!(msg_types(&trace), vec![ShReq, WbReq, WbRep, ShRep]);
    assert_eq!(trace[1].receiver, Endpoint::Cache(NodeId(1)));
    assert_eq!(result.hit_where, HitWhere::Remote);

    let stats = system.directories()[0].stats();
    assert_eq!((stats.forwards, stats.forward_hits, stats.forward_failures), (1, 1, 0));
    assert_eq!(stats.dram_reads, 1);
    assert_eq!(system.directory_entry(a).and_then(|e| e.forwarder()), Some(NodeId(2)));
    assert_coherent(&system);
}

#[test]
fn mesi_never_names_a_forwarder() {
    let mut system = build(&small_config(3, Protocol::Mesi));
    let a = line(9);
    for core in 0..3 {
        let _ = read_u64(&mut system, core, a);
    }
    let entry = system.directory_entry(a).unwrap();
    assert_eq!(entry.forwarder(), None);
    assert_eq!(entry.num_sharers(), 3);
    assert_eq!(system.directories()[0].stats().forwards, 0);
}

// ══════════════════════════════════════════════════════════
// 4. Limited directories
// ══════════════════════════════════════════════════════════

/// With room for one sharer, a second reader displaces the first.
#[test]
fn limited_no_broadcast_evicts_a_sharer() {
    let mut config = small_config(2, Protocol::Mesi);
    config.directory.kind = DirectoryType::LimitedNoBroadcast;
    config.directory.max_hw_sharers = 1;
    let mut system = build(&config);
    let a = line(10);

    write_u64(&mut system, 0, a, 5);
    assert_eq!(read_u64(&mut system, 1, a), 5);

    assert_eq!(system.line_state(0, CacheLevel::L2, a), CacheState::Invalid);
    assert_eq!(system.line_state(1, CacheLevel::L2, a), CacheState::Exclusive);
    let entry = system.directory_entry(a).unwrap();
    assert_eq!(entry.sharers().collect::<Vec<_>>(), vec![NodeId(1)]);
    assert_eq!(system.directories()[0].stats().sharer_evictions, 1);
    assert_coherent(&system);
}

/// Past its pointer capacity the entry invalidates every node, holders or not.
#[test]
fn limited_broadcast_invalidates_everyone() {
    let mut config = small_config(3, Protocol::Msi);
    config.directory.kind = DirectoryType::LimitedBroadcast;
    config.directory.max_hw_sharers = 1;
    let mut system = build(&config);
    let a = line(11);

    let _ = read_u64(&mut system, 0, a);
    let _ = read_u64(&mut system, 1, a);
    assert!(system.directory_entry(a).unwrap().in_broadcast_mode());

    system.enable_message_trace();
    write_u64(&mut system, 0, a, 1);
    let trace = system.take_message_trace();
    assert_eq!(msg_types(&trace), vec![UpgradeReq, InvReq, InvReq, InvRep, UpgradeRep]);
    let targets: Vec<Endpoint> = trace.iter().filter(|r| r.msg_type == InvReq).map(|r| r.receiver).collect();
    assert_eq!(targets, vec![Endpoint::Cache(NodeId(1)), Endpoint::Cache(NodeId(2))]);

    let stats = system.directories()[0].stats();
    assert_eq!(stats.broadcasts, 1);
    assert_eq!(stats.invalidations, 2);
    assert_coherent(&system);
}

// ══════════════════════════════════════════════════════════
// 5. Homes, direct mode, instruction side
// ══════════════════════════════════════════════════════════

#[test]
fn lines_interleave_across_homes() {
    let mut config = small_config(2, Protocol::Mesi);
    config.directory.homes = 2;
    let mut system = build(&config);
    write_u64(&mut system, 0, line(0), 1);
    write_u64(&mut system, 1, line(1), 2);

    let dirs = system.directories();
    assert!(dirs[0].entry(line(0)).is_some());
    assert!(dirs[0].entry(line(1)).is_none());
    assert!(dirs[1].entry(line(1)).is_some());
    assert_eq!(dirs[0].stats().ex_reqs + dirs[1].stats().ex_reqs, 2);
    assert_coherent(&system);
}

/// With one shared last level, a sibling's dirty first-level copy is handed over in place.
#[test]
fn direct_mode_sibling_hand_over() {
    let mut system = build(&direct_config(2));
    assert!(system.is_direct_dram());
    assert!(system.directories().is_empty());
    let a = line(12);

    write_u64(&mut system, 0, a, 0xabc);
    assert_eq!(system.line_state(0, CacheLevel::L2, a), CacheState::Modified);

    let mut buf = [0u8; 8];
    let result = system.read(1, a, &mut buf);
    assert_eq!(u64::from_le_bytes(buf), 0xabc);
    assert_eq!(result.hit_where, HitWhere::Sibling(CacheLevel::L2));
    assert_eq!(system.line_state(0, CacheLevel::L1D, a), CacheState::Shared);
    assert_eq!(system.line_state(1, CacheLevel::L1D, a), CacheState::Shared);
    assert_eq!(system.network().pending(), 0);
    assert_coherent(&system);
}

#[test]
fn direct_mode_write_invalidates_sibling() {
    let mut system = build(&direct_config(2));
    let a = line(13);
    let _ = read_u64(&mut system, 0, a);
    let _ = read_u64(&mut system, 1, a);
    write_u64(&mut system, 1, a, 4);
    assert_eq!(system.line_state(0, CacheLevel::L1D, a), CacheState::Invalid);
    assert_eq!(system.line_state(1, CacheLevel::L1D, a), CacheState::Modified);
    assert_eq!(read_u64(&mut system, 0, a), 4);
    assert_coherent(&system);
}

/// A data-side store removes the stale instruction-side copy.
#[test]
fn store_invalidates_instruction_copy() {
    let mut config = small_config(1, Protocol::Mesi);
    config.cache.l1_i.enabled = true;
    config.cache.l1_i.size_bytes = 1024;
    config.cache.l1_i.ways = 2;
    let mut system = build(&config);
    let a = line(14);

    let mut insn = [0u8; 4];
    let fetch = system.access(0, Port::Instruction, MemOp::Read, a, 0, &mut insn, true);
    assert_eq!(fetch.hit_where, HitWhere::Dram);
    assert_eq!(system.line_state(0, CacheLevel::L1I, a), CacheState::Shared);

    let _ = system.write(0, a, &[0x13, 0, 0, 0]);
    assert_eq!(system.line_state(0, CacheLevel::L1I, a), CacheState::Invalid);

    let _ = system.access(0, Port::Instruction, MemOp::Read, a, 0, &mut insn, true);
    assert_eq!(insn, [0x13, 0, 0, 0]);
    assert_coherent(&system);
}

// ══════════════════════════════════════════════════════════
// 6. Timing, warmup and prefetch
// ══════════════════════════════════════════════════════════

#[test]
fn miss_costs_more_than_hit_and_advances_core_time() {
    let mut system = build(&small_config(2, Protocol::Mesi));
    let a = line(15);
    let mut buf = [0u8; 8];
    let miss = system.read(0, a, &mut buf);
    let after_miss = system.core_time(0);
    let hit = system.read(0, a, &mut buf);

    assert!(miss.latency > hit.latency, "miss {} vs hit {}", miss.latency, hit.latency);
    assert_eq!(after_miss, miss.latency);
    assert_eq!(system.core_time(0), miss.latency + hit.latency);
    assert_eq!(system.core_time(1), 0);
}

#[test]
fn warmup_installs_without_advancing_time() {
    let mut system = build(&small_config(2, Protocol::Mesi));
    let a = line(16);
    let mut buf = [0u8; 8];
    let _ = system.access(0, Port::Data, MemOp::Read, a, 0, &mut buf, false);
    assert_eq!(system.core_time(0), 0);
    assert_eq!(system.line_state(0, CacheLevel::L1D, a), CacheState::Shared);

    let _ = system.read(0, a, &mut buf);
    let l1 = system.cache_for(0, CacheLevel::L1D).unwrap();
    assert_eq!(l1.stats().hits_warmup, 1);
    assert_eq!(l1.stats().loads, 1);
}

/// A sibling hitting a shared last level while the line's directory fill is still in flight waits for it.
#[test]
fn last_level_hit_waits_for_fill_in_flight() {
    let mut config = small_config(2, Protocol::Mesi);
    config.cache.l2.shared_cores = 2;
    let mut system = build(&config);
    let mut buf = [0u8; 8];

    // Move core 1 past core 0's directory request without touching line 0.
    let _ = system.access(1, Port::Data, MemOp::Read, line(5), 0, &mut buf, false);
    let _ = system.read(1, line(5), &mut buf);
    assert!(system.core_time(1) > 2);

    let first = system.read(0, line(0), &mut buf);
    assert_eq!(first.hit_where, HitWhere::Dram);
    let t_sibling = system.core_time(1);
    assert!(t_sibling < first.latency);

    let second = system.read(1, line(0), &mut buf);
    assert_eq!(second.hit_where, HitWhere::Cache(CacheLevel::L2));
    let l2 = system.cache_for(0, CacheLevel::L2).unwrap();
    assert_eq!(l2.stats().overlapping, 1);
    assert!(l2.stats().mshr_latency > 0);
    assert!(t_sibling + second.latency >= first.latency, "sibling finished before the fill");
    assert_coherent(&system);
}

#[test]
fn prefetched_line_counts_its_first_demand_hit() {
    let mut system = build(&small_config(2, Protocol::Mesi));
    let a = line(17);
    let pf = system.prefetch(0, CacheLevel::L2, a + 5);
    assert_eq!(pf.hit_where, HitWhere::Dram);
    assert_eq!(system.line_state(0, CacheLevel::L2, a), CacheState::Exclusive);
    assert_eq!(system.line_state(0, CacheLevel::L1D, a), CacheState::Invalid);

    let mut buf = [0u8; 8];
    let result = system.read(0, a, &mut buf);
    assert_eq!(result.hit_where, HitWhere::Cache(CacheLevel::L2));
    let l2 = system.cache_for(0, CacheLevel::L2).unwrap();
    assert_eq!(l2.stats().prefetches, 1);
    assert_eq!(l2.stats().hits_prefetch, 1);
    assert_coherent(&system);
}

#[test]
fn first_level_fast_path_refuses_misses() {
    let mut system = build(&small_config(2, Protocol::Mesi));
    let a = line(18);
    let mut buf = [0u8; 8];
    assert!(
        system
            .access_if_first_level_hit(0, Port::Data, MemOp::Read, a, 0, &mut buf, true)
            .is_none()
    );
    assert_eq!(system.core_time(0), 0);
    let _ = read_u64(&mut system, 0, a);
    assert!(
        system
            .access_if_first_level_hit(0, Port::Data, MemOp::Write, a, 0, &mut buf, true)
            .is_none(),
        "a SHARED first-level copy cannot take a write"
    );
    assert!(
        system
            .access_if_first_level_hit(0, Port::Data, MemOp::Read, a, 0, &mut buf, true)
            .is_some()
    );
}

#[test]
#[should_panic(expected = "coherence protocol violation")]
fn access_crossing_a_line_is_a_violation() {
    let mut system = build(&small_config(1, Protocol::Mesi));
    let mut buf = [0u8; 8];
    let _ = system.access(0, Port::Data, MemOp::Read, line(0), 60, &mut buf, true);
}
