//! Reader/writer lock guarding one associative set.
//!
//! Shared holders are first-level hits running side by side; an exclusive holder is a request
//! that leaves the first level and may touch any sibling's copy of a line in the set.
//! Upgrading gives up the shared hold before waiting for exclusivity, so two holders that both
//! decide to escalate queue up instead of waiting on each other.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Holders {
    readers: usize,
    writer: bool,
    writers_waiting: usize,
}

/// Lock for one set of a last-level cache.
#[derive(Debug, Default)]
pub struct SetLock {
    holders: Mutex<Holders>,
    cond: Condvar,
}

impl SetLock {
    /// Creates an unheld lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock in shared mode, waiting while a writer holds or waits for it.
    pub fn shared(&self) -> SetReadGuard<'_> {
        let mut holders = self.holders.lock();
        while holders.writer || holders.writers_waiting > 0 {
            self.cond.wait(&mut holders);
        }
        holders.readers += 1;
        SetReadGuard { lock: self }
    }

    /// Acquires the lock in exclusive mode.
    pub fn exclusive(&self) -> SetWriteGuard<'_> {
        let mut holders = self.holders.lock();
        self.wait_exclusive(&mut holders);
        SetWriteGuard { lock: self }
    }

    /// Returns `true` if an exclusive holder exists.
    pub fn is_exclusive(&self) -> bool {
        self.holders.lock().writer
    }

    /// Number of shared holders.
    pub fn readers(&self) -> usize {
        self.holders.lock().readers
    }

    fn wait_exclusive(&self, holders: &mut parking_lot::MutexGuard<'_, Holders>) {
        holders.writers_waiting += 1;
        while holders.writer || holders.readers > 0 {
            self.cond.wait(holders);
        }
        holders.writers_waiting -= 1;
        holders.writer = true;
    }

    fn release_shared(&self) {
        let mut holders = self.holders.lock();
        holders.readers -= 1;
        if holders.readers == 0 {
            let _ = self.cond.notify_all();
        }
    }

    fn release_exclusive(&self) {
        let mut holders = self.holders.lock();
        holders.writer = false;
        let _ = self.cond.notify_all();
    }
}

/// Shared hold on a [`SetLock`]; released on drop.
#[derive(Debug)]
pub struct SetReadGuard<'a> {
    lock: &'a SetLock,
}

impl<'a> SetReadGuard<'a> {
    /// Trades the shared hold for an exclusive one.
    ///
    /// The shared hold is released before waiting, so the set may change in between; callers
    /// must re-check whatever they observed under the shared hold.
    pub fn upgrade(self) -> SetWriteGuard<'a> {
        let lock = self.lock;
        std::mem::forget(self);
        let mut holders = lock.holders.lock();
        holders.readers -= 1;
        if holders.readers == 0 {
            let _ = lock.cond.notify_all();
        }
        lock.wait_exclusive(&mut holders);
        SetWriteGuard { lock }
    }
}

impl Drop for SetReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_shared();
    }
}

/// Exclusive hold on a [`SetLock`]; released on drop.
#[derive(Debug)]
pub struct SetWriteGuard<'a> {
    lock: &'a SetLock,
}

impl<'a> SetWriteGuard<'a> {
    /// Trades the exclusive hold for a shared one without letting another writer in.
    pub fn downgrade(self) -> SetReadGuard<'a> {
        let lock = self.lock;
        std::mem::forget(self);
        let mut holders = lock.holders.lock();
        holders.writer = false;
        holders.readers += 1;
        let _ = lock.cond.notify_all();
        SetReadGuard { lock }
    }
}

impl Drop for SetWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_exclusive();
    }
}
