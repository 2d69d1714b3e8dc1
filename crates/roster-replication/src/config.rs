//! Replication configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for an outbound replication channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Period of the fire-and-forget heartbeat sent over the channel's
    /// connection.
    pub heartbeat_interval: Duration,

    /// A send that stalls past this deadline counts as a transport failure
    /// and closes the channel.
    pub send_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            send_timeout: Duration::from_secs(5),
        }
    }
}
