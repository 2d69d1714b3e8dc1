//! Roster Registry - Multi-sourced in-memory service registry
//!
//! The registry keeps the authoritative view of which service instances
//! exist, reconciling concurrent claims about the same instance from
//! distinct sources (local clients, replication peers, bootstrap data) into
//! one selected view per instance, and streaming ordered change
//! notifications to interest-filtered subscribers.
//!
//! ## Pieces
//!
//! - **[`SourcedRegistry`]**: the id-to-holder map and every mutation entry
//!   point; mutations serialize per instance id, never globally
//! - **[`InstanceHolder`]**: per-id container with one copy per source and
//!   the view chosen by the selection policy
//! - **[`InterestSubscription`]**: snapshot-then-live notification stream
//!   with bounded buffering; slow consumers are terminated, not waited on
//! - **[`EvictionQuotaSource`]**: external throttle gating how fast a dead
//!   source's registrations may be evicted
//!
//! ## Example
//!
//! ```no_run
//! use roster_registry::{RegistryConfig, SourcedRegistry};
//! use roster_types::{InstanceInfo, Interest, Source};
//!
//! # async fn example() -> roster_registry::Result<()> {
//! let (quota_tx, quota_rx) = tokio::sync::mpsc::channel(8);
//! let registry = SourcedRegistry::new(
//!     RegistryConfig::default(),
//!     quota_rx,
//!     &prometheus::Registry::new(),
//! );
//!
//! let info = InstanceInfo::builder("i-1").version(1).app("search").build();
//! registry.register(info, Source::local("srv1")).await?;
//!
//! let mut changes = registry.for_interest(Interest::by_app("search")).await?;
//! while let Some(notification) = changes.next().await {
//!     println!("{notification:?}");
//! }
//! # let _ = quota_tx;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod fabric;
pub mod holder;
pub mod lifecycle;
pub mod metrics;
pub mod preservation;
pub mod registry;
pub mod selector;

// Re-exports
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use fabric::InterestSubscription;
pub use holder::{HolderSnapshot, InstanceHolder};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use metrics::RegistryMetrics;
pub use preservation::EvictionQuotaSource;
pub use registry::SourcedRegistry;
pub use selector::{OriginSelector, SourceSelector};
