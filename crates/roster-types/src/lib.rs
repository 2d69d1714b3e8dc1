//! Roster Types - Core data model for the roster registry
//!
//! This crate provides the value types shared by every roster component:
//!
//! - **Source**: tagged origin of a registration (local client, replication
//!   peer, bootstrap loader, ...)
//! - **InstanceInfo**: a registered service instance with its attribute bag
//! - **Delta**: an attribute-scoped diff between two versions of an instance
//! - **ChangeNotification**: the Add/Modify/Delete records streamed to
//!   subscribers
//! - **Interest**: composable predicates used to filter notification streams
//!
//! Everything here is pure data: no async, no I/O, no registry semantics.
//! The registry crates build on these types.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod delta;
pub mod instance;
pub mod interest;
pub mod notification;
pub mod source;

// Re-exports
pub use delta::{Delta, DeltaError};
pub use instance::{attrs, InstanceInfo, InstanceInfoBuilder};
pub use interest::Interest;
pub use notification::{ChangeNotification, NotificationKind};
pub use source::{Origin, Source, SourceFilter};
