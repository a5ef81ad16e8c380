//! Coherence message transport.
//!
//! An ordered, reliable FIFO between last-level caches and directory homes. Every message is
//! charged the configured hop latency on send. Delivery order is global send order, which
//! implies point-to-point order. Broadcast is a send to every endpoint of a caller-supplied set.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::trace;

use crate::coherence::{Endpoint, MsgType, ShmemMsg};

/// One delivered message as recorded by the trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgRecord {
    /// Message type.
    pub msg_type: MsgType,
    /// Issuing endpoint.
    pub sender: Endpoint,
    /// Destination endpoint.
    pub receiver: Endpoint,
    /// Line address.
    pub address: u64,
}

/// Per-type message counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    /// Messages sent, indexed by [`MsgType::index`].
    pub sent: [u64; MsgType::COUNT],
    /// Messages carrying a line of data.
    pub data_messages: u64,
}

/// Ordered message queue.
#[derive(Debug, Clone)]
pub struct Network {
    queue: VecDeque<ShmemMsg>,
    hop_latency: u64,
    stats: NetworkStats,
    trace: Option<Vec<MsgRecord>>,
}

impl Network {
    /// Creates an idle network.
    pub fn new(hop_latency: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            hop_latency,
            stats: NetworkStats::default(),
            trace: None,
        }
    }

    /// Queues a message for delivery, adding the hop latency to its timestamp.
    pub fn send(&mut self, mut msg: ShmemMsg) {
        msg.time += self.hop_latency;
        self.stats.sent[msg.msg_type.index()] += 1;
        if msg.data.is_some() {
            self.stats.data_messages += 1;
        }
        trace!(
            msg = %msg.msg_type,
            from = %msg.sender,
            to = %msg.receiver,
            address = format_args!("{:#x}", msg.address),
            time = msg.time,
            "send"
        );
        self.queue.push_back(msg);
    }

    /// Sends a copy of `msg` to each destination.
    pub fn broadcast(&mut self, msg: &ShmemMsg, dests: impl IntoIterator<Item = Endpoint>) {
        for receiver in dests {
            let mut copy = msg.clone();
            copy.receiver = receiver;
            self.send(copy);
        }
    }

    /// Removes the next message in delivery order.
    pub fn pop(&mut self) -> Option<ShmemMsg> {
        let msg = self.queue.pop_front()?;
        if let Some(trace) = self.trace.as_mut() {
            trace.push(MsgRecord {
                msg_type: msg.msg_type,
                sender: msg.sender,
                receiver: msg.receiver,
                address: msg.address,
            });
        }
        Some(msg)
    }

    /// Messages sent but not yet delivered.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Starts recording delivered messages, discarding any previous record.
    pub fn enable_trace(&mut self) {
        self.trace = Some(Vec::new());
    }

    /// Returns the messages delivered since the trace was enabled or last taken.
    pub fn take_trace(&mut self) -> Vec<MsgRecord> {
        self.trace.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Number of messages of a type sent so far.
    pub const fn sent(&self, msg_type: MsgType) -> u64 {
        self.stats.sent[msg_type.index()]
    }

    /// Message counters.
    pub const fn stats(&self) -> &NetworkStats {
        &self.stats
    }
}
