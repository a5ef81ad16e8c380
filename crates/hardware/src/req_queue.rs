//! Per-address request queues.
//!
//! `ReqQueueList` keeps one FIFO per line address. The directory uses it to serialize
//! transactions (only the head of a line's queue is ever active), and cache controllers use
//! it to park requests waiting for a directory reply.

use std::collections::{HashMap, VecDeque};

/// Map from line address to a FIFO of pending items.
///
/// Queues are created on first enqueue and removed when they drain, so `is_empty(addr)`
/// doubles as "no transaction pending for this line".
#[derive(Debug, Clone)]
pub struct ReqQueueList<T> {
    queues: HashMap<u64, VecDeque<T>>,
}

impl<T> Default for ReqQueueList<T> {
    fn default() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }
}

impl<T> ReqQueueList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item to the line's queue.
    ///
    /// # Returns
    ///
    /// The queue length after the append; `1` means the item is now the head.
    pub fn enqueue(&mut self, address: u64, item: T) -> usize {
        let queue = self.queues.entry(address).or_default();
        queue.push_back(item);
        queue.len()
    }

    /// Removes and returns the head of the line's queue.
    pub fn dequeue(&mut self, address: u64) -> Option<T> {
        let queue = self.queues.get_mut(&address)?;
        let item = queue.pop_front();
        if queue.is_empty() {
            let _ = self.queues.remove(&address);
        }
        item
    }

    /// Head of the line's queue.
    pub fn front(&self, address: u64) -> Option<&T> {
        self.queues.get(&address).and_then(VecDeque::front)
    }

    /// Mutable head of the line's queue.
    pub fn front_mut(&mut self, address: u64) -> Option<&mut T> {
        self.queues.get_mut(&address).and_then(VecDeque::front_mut)
    }

    /// Number of items queued for the line.
    pub fn len(&self, address: u64) -> usize {
        self.queues.get(&address).map_or(0, VecDeque::len)
    }

    /// Returns `true` if nothing is queued for the line.
    pub fn is_empty(&self, address: u64) -> bool {
        !self.queues.contains_key(&address)
    }

    /// Total number of queued items across all lines.
    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}
