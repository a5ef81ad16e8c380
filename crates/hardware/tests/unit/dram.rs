//! # Backing Store Tests
//!
//! The bundled store, both latency controllers, and a scripted store plugged into a full system.

use cohsim_core::MemorySystem;
use cohsim_core::coherence::HitWhere;
use cohsim_core::config::{MemoryConfig, MemoryController as ControllerKind, Protocol};
use cohsim_core::dram::{BackingStore, DramController, DramCntlr, MemoryController, SimpleController};
use pretty_assertions::assert_eq;

use crate::common::harness::{LINE, init_tracing, line, read_u64, small_config, write_u64};
use crate::common::mocks::{MockStore, dram};

// ══════════════════════════════════════════════════════════
// 1. Latency controllers
// ══════════════════════════════════════════════════════════

#[test]
fn simple_controller_is_constant() {
    let mut ctrl = SimpleController::new(42);
    assert_eq!(ctrl.access_latency(0), 42);
    assert_eq!(ctrl.access_latency(0xdead_beef), 42);
}

/// First access activates a row, same-row accesses pay CAS only, a row switch precharges.
#[test]
fn dram_controller_models_open_row() {
    let mut ctrl = DramController::new(10, 20, 30);
    assert_eq!(ctrl.access_latency(0x1000), 20 + 10);
    assert_eq!(ctrl.access_latency(0x1040), 10);
    assert_eq!(ctrl.access_latency(0x1000 + 2048), 30 + 20 + 10);
    assert_eq!(ctrl.access_latency(0x1000 + 2048 + 64), 10);
}

// ══════════════════════════════════════════════════════════
// 2. Bundled store
// ══════════════════════════════════════════════════════════

#[test]
fn unwritten_memory_reads_zero() {
    let mut store = DramCntlr::new(64, Box::new(SimpleController::new(5)));
    let mut buf = [0xffu8; 64];
    let access = store.read(0x4000, &mut buf);
    assert_eq!(buf, [0u8; 64]);
    assert_eq!(access.latency, 5);
    assert_eq!(access.hit_where, HitWhere::Dram);
    assert_eq!(store.reads(), 1);
    assert!(store.peek(0x4000).is_none());
}

#[test]
fn write_is_visible_to_later_reads() {
    let mut store = DramCntlr::new(64, Box::new(SimpleController::new(5)));
    let line: Vec<u8> = (0..64).collect();
    assert_eq!(store.write(0x4000, &line), 5);
    assert_eq!(store.writes(), 1);
    assert_eq!(store.peek(0x4010), Some(line.as_slice()));

    let mut buf = [0u8; 64];
    let _ = store.read(0x4000, &mut buf);
    assert_eq!(&buf[..], line.as_slice());
}

#[test]
fn from_config_picks_controller() {
    let config = MemoryConfig {
        controller: ControllerKind::Dram,
        t_cas: 1,
        t_ras: 2,
        t_pre: 3,
        ..MemoryConfig::default()
    };
    let mut store = DramCntlr::from_config(64, &config);
    let mut buf = [0u8; 64];
    assert_eq!(store.read(0, &mut buf).latency, 3);
    assert_eq!(store.read(64, &mut buf).latency, 1);

    let mut simple = DramCntlr::from_config(64, &MemoryConfig::default());
    assert_eq!(simple.read(0, &mut buf).latency, 100);
}

// ══════════════════════════════════════════════════════════
// 3. Scripted store behind the directory
// ══════════════════════════════════════════════════════════

/// The directory fills a miss from the store once; the second read hits in the L1.
#[test]
fn directory_fills_from_backing_store() {
    init_tracing();
    let a = line(0);
    let mut store = MockStore::new();
    let _ = store
        .expect_read()
        .withf(move |address, _| *address == a)
        .times(1)
        .returning(|_, buf| {
            buf.fill(0x5a);
            dram(77)
        });
    let _ = store.expect_write().times(0);

    let config = small_config(2, Protocol::Mesi);
    let mut system = MemorySystem::with_backing_store(&config, Box::new(store)).unwrap();
    let mut buf = [0u8; 8];
    let miss = system.read(0, a, &mut buf);
    assert_eq!(buf, [0x5a; 8]);
    assert_eq!(miss.hit_where, HitWhere::Dram);
    assert!(miss.latency >= 77, "miss latency {} hides the store", miss.latency);

    assert_eq!(read_u64(&mut system, 0, a), 0x5a5a_5a5a_5a5a_5a5a);
}

/// A dirty line handed back for a reader is written to the store exactly once.
#[test]
fn write_back_reaches_backing_store() {
    init_tracing();
    let a = line(3);
    let mut store = MockStore::new();
    let _ = store.expect_read().times(1).returning(|_, buf| {
        buf.fill(0);
        dram(10)
    });
    let _ = store
        .expect_write()
        .withf(move |address, data| {
            *address == a && data.len() == LINE as usize && data[..8] == 0x1234_u64.to_le_bytes()
        })
        .times(1)
        .return_const(10u64);

    let config = small_config(2, Protocol::Mesi);
    let mut system = MemorySystem::with_backing_store(&config, Box::new(store)).unwrap();
    write_u64(&mut system, 0, a, 0x1234);
    assert_eq!(read_u64(&mut system, 1, a), 0x1234);
}
