//! Inbound replication.
//!
//! The receiving half of a replication link: maps wire messages from a peer
//! onto local registry operations tagged with that peer's `Replicated`
//! source. Framing and connection acceptance live outside the core; this is
//! the application step only.

use roster_registry::SourcedRegistry;
use roster_types::Source;
use tracing::debug;

use crate::error::Result;
use crate::protocol::ReplicationMessage;

/// Apply one message received from the peer behind `source`.
///
/// Returns whether the operation created or destroyed a holder, mirroring
/// the registry's own boolean results. Heartbeats are liveness-only and
/// never touch the registry.
pub async fn apply_remote(
    registry: &SourcedRegistry,
    source: &Source,
    message: ReplicationMessage,
) -> Result<bool> {
    debug!(source = %source, kind = message.kind(), "applying replicated change");
    match message {
        ReplicationMessage::Register(info) | ReplicationMessage::Update(info) => {
            Ok(registry.register(info, source.clone()).await?)
        }
        ReplicationMessage::Unregister(id) => Ok(registry.unregister_id(&id, source).await?),
        ReplicationMessage::Heartbeat => Ok(false),
    }
}
