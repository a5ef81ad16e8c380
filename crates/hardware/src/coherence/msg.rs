//! Coherence messages exchanged between last-level caches and directories.

use std::fmt;

use crate::common::NodeId;
use crate::coherence::state::HitWhere;

/// Coherence message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Request for a writable copy.
    ExReq,
    /// Request for a readable copy.
    ShReq,
    /// Request to promote a shared copy the requester already holds.
    UpgradeReq,
    /// Directory asks a sharer to drop its copy.
    InvReq,
    /// Directory asks a holder to drop its copy and hand back the data.
    FlushReq,
    /// Directory asks a holder to keep a shared copy and hand back the data.
    WbReq,
    /// Grants a writable (or exclusive-clean) copy with data.
    ExRep,
    /// Grants a shared copy with data.
    ShRep,
    /// Grants the upgrade of a shared copy; carries no data.
    UpgradeRep,
    /// Acknowledges an invalidation or announces a clean eviction.
    InvRep,
    /// Acknowledges a flush or announces a dirty eviction; carries the line.
    FlushRep,
    /// Acknowledges a write-back; carries the line.
    WbRep,
}

impl MsgType {
    /// Number of message types.
    pub const COUNT: usize = 12;

    /// Every message type, in counter order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::ExReq,
        Self::ShReq,
        Self::UpgradeReq,
        Self::InvReq,
        Self::FlushReq,
        Self::WbReq,
        Self::ExRep,
        Self::ShRep,
        Self::UpgradeRep,
        Self::InvRep,
        Self::FlushRep,
        Self::WbRep,
    ];

    /// Position in [`MsgType::ALL`].
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Wire name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ExReq => "EX_REQ",
            Self::ShReq => "SH_REQ",
            Self::UpgradeReq => "UPGRADE_REQ",
            Self::InvReq => "INV_REQ",
            Self::FlushReq => "FLUSH_REQ",
            Self::WbReq => "WB_REQ",
            Self::ExRep => "EX_REP",
            Self::ShRep => "SH_REP",
            Self::UpgradeRep => "UPGRADE_REP",
            Self::InvRep => "INV_REP",
            Self::FlushRep => "FLUSH_REP",
            Self::WbRep => "WB_REP",
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sender or receiver of a coherence message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A last-level cache instance.
    Cache(NodeId),
    /// A directory home, by index.
    Directory(usize),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache(node) => write!(f, "{node}"),
            Self::Directory(home) => write!(f, "dir{home}"),
        }
    }
}

/// A coherence message.
///
/// `time` is the accounting timestamp: the simulated time at which the sender issued the
/// message, advanced by the transport's hop latency on delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShmemMsg {
    /// Message type.
    pub msg_type: MsgType,
    /// Issuing endpoint.
    pub sender: Endpoint,
    /// Destination endpoint.
    pub receiver: Endpoint,
    /// Node whose request started the transaction this message belongs to.
    pub requester: NodeId,
    /// Line address.
    pub address: u64,
    /// One line of payload, when the message carries data.
    pub data: Option<Box<[u8]>>,
    /// Whether `data` is newer than the backing store.
    pub dirty: bool,
    /// Where the replied data came from.
    pub hit_where: HitWhere,
    /// Whether the originating request is a prefetch.
    pub is_prefetch: bool,
    /// Accounting timestamp.
    pub time: u64,
}

impl ShmemMsg {
    /// Creates a message without payload.
    pub const fn new(
        msg_type: MsgType,
        sender: Endpoint,
        receiver: Endpoint,
        requester: NodeId,
        address: u64,
        time: u64,
    ) -> Self {
        Self {
            msg_type,
            sender,
            receiver,
            requester,
            address,
            data: None,
            dirty: false,
            hit_where: HitWhere::Miss,
            is_prefetch: false,
            time,
        }
    }

    /// Attaches one line of payload.
    #[must_use]
    pub fn with_data(mut self, data: Box<[u8]>, dirty: bool) -> Self {
        self.data = Some(data);
        self.dirty = dirty;
        self
    }

    /// Records where the payload came from.
    #[must_use]
    pub fn with_hit_where(mut self, hit_where: HitWhere) -> Self {
        self.hit_where = hit_where;
        self
    }

    /// Marks the message as part of a prefetch transaction.
    #[must_use]
    pub fn with_prefetch(mut self, is_prefetch: bool) -> Self {
        self.is_prefetch = is_prefetch;
        self
    }
}
