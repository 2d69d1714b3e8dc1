//! Replication wire messages.
//!
//! The channel only constructs these and hands them to the transport;
//! framing and serialization formats live behind the transport seam.

use roster_types::InstanceInfo;
use serde::{Deserialize, Serialize};

/// One replication operation as shipped to a peer.
///
/// Updates are full replacements on the wire; the receiver reconstructs
/// deltas locally if it wants them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplicationMessage {
    /// A copy appeared on the sending node.
    Register(InstanceInfo),

    /// The sending node's selected view of the instance changed.
    Update(InstanceInfo),

    /// The instance disappeared from the sending node.
    Unregister(String),

    /// Connection liveness probe.
    Heartbeat,
}

impl ReplicationMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ReplicationMessage::Register(_) => "register",
            ReplicationMessage::Update(_) => "update",
            ReplicationMessage::Unregister(_) => "unregister",
            ReplicationMessage::Heartbeat => "heartbeat",
        }
    }
}
