
/// Mock implementations of the backing store.
pub mod mocks;
