use cohsim_core::coherence::HitWhere;
use cohsim_core::dram::{BackingStore, DramAccess};
use mockall::mock;

mock! {
    /// Backing store whose reads and writes are scripted by the test.
    pub Store {}

    impl BackingStore for Store {
        fn read(&mut self, address: u64, buf: &mut [u8]) -> DramAccess;
        fn write(&mut self, address: u64, data: &[u8]) -> u64;
    }
}

/// A read result with a fixed latency, served from DRAM.
pub const fn dram(latency: u64) -> DramAccess {
    DramAccess {
        latency,
        hit_where: HitWhere::Dram,
    }
}
