//! Instance value types
//!
//! An `InstanceInfo` describes one registered service instance: a stable id,
//! a per-source monotonic version, and a flat attribute bag. The registry
//! never interprets attributes beyond the few well-known keys used by
//! interest matching; everything else is opaque payload carried for clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::delta::Delta;

/// Well-known attribute keys.
pub mod attrs {
    /// Logical application the instance belongs to.
    pub const APP: &str = "app";
    /// Virtual address the instance serves.
    pub const VIP: &str = "vip";
    /// Availability zone.
    pub const ZONE: &str = "zone";
    /// Advertised lifecycle status.
    pub const STATUS: &str = "status";
}

/// A registered service instance as seen from one source at one point in
/// time.
///
/// Two values with the same `id` describe the same logical instance, possibly
/// from different sources or different moments. Equality is structural over
/// id, version and the full attribute bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    id: String,
    version: u64,
    attributes: BTreeMap<String, String>,
}

impl InstanceInfo {
    /// Start building an instance with the given id.
    pub fn builder(id: impl Into<String>) -> InstanceInfoBuilder {
        InstanceInfoBuilder {
            id: id.into(),
            version: 0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Version of this copy, monotonic within a single source.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn app_name(&self) -> Option<&str> {
        self.attribute(attrs::APP)
    }

    pub fn vip_address(&self) -> Option<&str> {
        self.attribute(attrs::VIP)
    }

    /// Compute the minimal attribute-level diff from `self` to `newer`.
    ///
    /// Each returned delta carries `newer`'s version. An attribute present in
    /// `self` but absent from `newer` produces a clearing delta.
    pub fn diff(&self, newer: &InstanceInfo) -> Vec<Delta> {
        let mut deltas = Vec::new();
        for (key, value) in &newer.attributes {
            if self.attributes.get(key) != Some(value) {
                deltas.push(Delta::set(&newer.id, newer.version, key, value));
            }
        }
        for key in self.attributes.keys() {
            if !newer.attributes.contains_key(key) {
                deltas.push(Delta::clear(&newer.id, newer.version, key));
            }
        }
        deltas
    }

    pub(crate) fn with_attribute(
        &self,
        version: u64,
        key: &str,
        value: Option<&str>,
    ) -> InstanceInfo {
        let mut attributes = self.attributes.clone();
        match value {
            Some(value) => {
                attributes.insert(key.to_string(), value.to_string());
            }
            None => {
                attributes.remove(key);
            }
        }
        InstanceInfo {
            id: self.id.clone(),
            version,
            attributes,
        }
    }
}

/// Builder for [`InstanceInfo`].
#[derive(Debug, Clone)]
pub struct InstanceInfoBuilder {
    id: String,
    version: u64,
    attributes: BTreeMap<String, String>,
}

impl InstanceInfoBuilder {
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn app(self, app: impl Into<String>) -> Self {
        self.attribute(attrs::APP, app)
    }

    pub fn vip(self, vip: impl Into<String>) -> Self {
        self.attribute(attrs::VIP, vip)
    }

    pub fn zone(self, zone: impl Into<String>) -> Self {
        self.attribute(attrs::ZONE, zone)
    }

    pub fn build(self) -> InstanceInfo {
        InstanceInfo {
            id: self.id,
            version: self.version,
            attributes: self.attributes,
        }
    }
}
