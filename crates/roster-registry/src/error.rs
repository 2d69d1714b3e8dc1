//! Registry error types

use roster_types::Source;
use thiserror::Error;
use uuid::Uuid;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    /// Operation attempted after the registry shut down.
    #[error("registry is shut down")]
    LifecycleClosed,

    /// Register/update with a version that does not advance the copy held
    /// for the same source.
    #[error("stale version for {id} from {source}: offered {offered}, holding {current}")]
    StaleVersion {
        id: String,
        source: Source,
        offered: u64,
        current: u64,
    },

    /// Delta targets an attribute the current instance does not carry.
    #[error("delta for {id} targets missing attribute {attribute}")]
    MalformedDelta { id: String, attribute: String },

    /// Subscriber fell behind its buffer high watermark.
    #[error("subscription {subscription} overran its buffer and was terminated")]
    SlowConsumer { subscription: Uuid },

    /// Invariant violation inside the registry. Cascades to shutdown.
    #[error("registry invariant violated: {0}")]
    Internal(String),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
