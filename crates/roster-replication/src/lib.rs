//! Roster Replication - Mirroring local registry changes to peers
//!
//! A [`ReplicationChannel`] subscribes to the local registry's full-interest
//! stream restricted to LOCAL-origin mutations and forwards every change to
//! one peer as a [`ReplicationMessage`] over a single, lazily established
//! connection. Heartbeats keep the connection honest; any transport failure
//! closes the channel and surfaces through its lifecycle stream.
//!
//! The transport itself (framing, serialization, sockets) is injected
//! through the [`TransportClient`] / [`ReplicationConnection`] seams.
//! [`apply_remote`] is the receiving half, mapping inbound messages onto a
//! registry with a `Replicated` source.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod channel;
pub mod config;
pub mod error;
pub mod inbound;
pub mod protocol;
pub mod transport;

// Re-exports
pub use channel::{ChannelState, ReplicationChannel};
pub use config::ReplicationConfig;
pub use error::{ReplicationError, Result};
pub use inbound::apply_remote;
pub use protocol::ReplicationMessage;
pub use transport::{ReplicationConnection, TransportClient};
