//! Replication error types

use roster_registry::RegistryError;
use thiserror::Error;

/// Replication errors
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Operation attempted on a closed channel.
    #[error("replication channel is already closed")]
    ChannelClosed,

    /// The transport failed to deliver a message or heartbeat. Closes the
    /// channel.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The local registry rejected an operation.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type for replication operations
pub type Result<T> = std::result::Result<T, ReplicationError>;
