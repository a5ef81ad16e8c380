//! # Request Queue Tests

use cohsim_core::req_queue::ReqQueueList;
use pretty_assertions::assert_eq;

#[test]
fn fifo_per_address() {
    let mut queues = ReqQueueList::new();
    assert_eq!(queues.enqueue(0x40, "a"), 1);
    assert_eq!(queues.enqueue(0x40, "b"), 2);
    assert_eq!(queues.enqueue(0x80, "c"), 1);
    assert_eq!(queues.total(), 3);

    assert_eq!(queues.front(0x40), Some(&"a"));
    assert_eq!(queues.dequeue(0x40), Some("a"));
    assert_eq!(queues.dequeue(0x40), Some("b"));
    assert_eq!(queues.dequeue(0x40), None);
    assert_eq!(queues.front(0x80), Some(&"c"));
}

/// A drained queue disappears, so emptiness means no pending transaction.
#[test]
fn drained_queue_reads_as_empty() {
    let mut queues = ReqQueueList::new();
    assert!(queues.is_empty(0x40));
    let _ = queues.enqueue(0x40, 1u32);
    assert!(!queues.is_empty(0x40));
    assert_eq!(queues.len(0x40), 1);
    let _ = queues.dequeue(0x40);
    assert!(queues.is_empty(0x40));
    assert_eq!(queues.len(0x40), 0);
    assert_eq!(queues.total(), 0);
}

#[test]
fn head_can_be_updated_in_place() {
    let mut queues = ReqQueueList::new();
    let _ = queues.enqueue(0x40, 1u32);
    let _ = queues.enqueue(0x40, 2u32);
    if let Some(head) = queues.front_mut(0x40) {
        *head = 10;
    }
    assert_eq!(queues.dequeue(0x40), Some(10));
    assert_eq!(queues.front(0x40), Some(&2));
    assert!(queues.front_mut(0x80).is_none());
}
