//! Transport seams.
//!
//! The channel is transport-agnostic: concrete framing, serialization and
//! connection management implement these traits and are injected at channel
//! construction.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::ReplicationMessage;

/// One established connection to a replication peer.
#[async_trait]
pub trait ReplicationConnection: Send + Sync {
    /// Ship a message; resolves on acknowledgement, fails on transport
    /// error.
    async fn send(&self, message: ReplicationMessage) -> Result<()>;

    /// Ship a liveness probe.
    async fn send_heartbeat(&self) -> Result<()>;

    /// Tear the connection down.
    async fn close(&self);
}

/// Connection factory for a replication peer.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Establish a connection. A channel calls this at most once and
    /// memoizes the result for its whole lifetime.
    async fn connect(&self) -> Result<Arc<dyn ReplicationConnection>>;
}
