//! Registration sources
//!
//! Every mutation of the registry is tagged with the `Source` that produced
//! it, so the registry can keep one copy per source and replication channels
//! can avoid echoing a peer's own updates back at it.

use serde::{Deserialize, Serialize};

/// Where a registration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// A client registering itself with this node.
    Local,

    /// A copy received from a replication peer.
    Replicated,

    /// Seed data loaded at startup.
    Bootstrap,

    /// A copy materialized from an interest subscription.
    Interested,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Replicated => write!(f, "replicated"),
            Origin::Bootstrap => write!(f, "bootstrap"),
            Origin::Interested => write!(f, "interested"),
        }
    }
}

/// A tagged origin for registry data.
///
/// Two sources are the same producer iff both origin and name match.
/// Sources are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    origin: Origin,
    name: String,
}

impl Source {
    pub fn new(origin: Origin, name: impl Into<String>) -> Self {
        Self {
            origin,
            name: name.into(),
        }
    }

    /// A source for clients registering directly with this node.
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(Origin::Local, name)
    }

    /// A source for copies received from the named replication peer.
    pub fn replicated(peer: impl Into<String>) -> Self {
        Self::new(Origin::Replicated, peer)
    }

    /// A source for seed data loaded at startup.
    pub fn bootstrap(name: impl Into<String>) -> Self {
        Self::new(Origin::Bootstrap, name)
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.origin, self.name)
    }
}

impl std::error::Error for Source {}

/// Selects which sources a subscription or eviction applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFilter {
    /// Match every source.
    Any,

    /// Match all sources with the given origin, regardless of name.
    Origin(Origin),

    /// Match exactly one source.
    Exact(Source),
}

impl SourceFilter {
    pub fn matches(&self, source: &Source) -> bool {
        match self {
            SourceFilter::Any => true,
            SourceFilter::Origin(origin) => source.origin() == *origin,
            SourceFilter::Exact(exact) => source == exact,
        }
    }
}
