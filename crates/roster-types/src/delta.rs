//! Attribute-scoped diffs
//!
//! A `Delta` describes one attribute change between two versions of an
//! instance. Modify notifications carry the deltas that produced the new
//! selected view, so subscribers can apply changes without re-reading the
//! whole instance.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instance::InstanceInfo;

/// Errors from applying a delta to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    #[error("delta targets instance {delta_id} but was applied to {info_id}")]
    IdMismatch { delta_id: String, info_id: String },

    #[error("delta version {offered} does not advance past {current}")]
    VersionRegression { offered: u64, current: u64 },

    #[error("attribute {attribute} is not present on the instance")]
    MissingAttribute { attribute: String },
}

/// One attribute change: `(id, version, attribute, new value)`.
///
/// A `None` value clears the attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    id: String,
    version: u64,
    attribute: String,
    value: Option<String>,
}

impl Delta {
    pub fn set(
        id: impl Into<String>,
        version: u64,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            attribute: attribute.into(),
            value: Some(value.into()),
        }
    }

    pub fn clear(id: impl Into<String>, version: u64, attribute: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version,
            attribute: attribute.into(),
            value: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Apply this delta, producing a new instance at the delta's version.
    ///
    /// Fails when the delta targets a different instance, does not advance
    /// the version, or names an attribute the instance does not carry.
    pub fn apply(&self, info: &InstanceInfo) -> Result<InstanceInfo, DeltaError> {
        if self.id != info.id() {
            return Err(DeltaError::IdMismatch {
                delta_id: self.id.clone(),
                info_id: info.id().to_string(),
            });
        }
        if self.version <= info.version() {
            return Err(DeltaError::VersionRegression {
                offered: self.version,
                current: info.version(),
            });
        }
        if info.attribute(&self.attribute).is_none() {
            return Err(DeltaError::MissingAttribute {
                attribute: self.attribute.clone(),
            });
        }
        Ok(info.with_attribute(self.version, &self.attribute, self.value.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::attrs;

    fn base() -> InstanceInfo {
        InstanceInfo::builder("i-1")
            .version(3)
            .app("search")
            .zone("us-east")
            .build()
    }

    #[test]
    fn apply_replaces_the_named_attribute() {
        let delta = Delta::set("i-1", 4, attrs::ZONE, "us-west");
        let updated = delta.apply(&base()).unwrap();

        assert_eq!(updated.id(), "i-1");
        assert_eq!(updated.version(), 4);
        assert_eq!(updated.attribute(attrs::ZONE), Some("us-west"));
        assert_eq!(updated.app_name(), Some("search"));
    }

    #[test]
    fn apply_clears_when_value_is_absent() {
        let delta = Delta::clear("i-1", 4, attrs::ZONE);
        let updated = delta.apply(&base()).unwrap();
        assert_eq!(updated.attribute(attrs::ZONE), None);
    }

    #[test]
    fn apply_rejects_missing_attribute() {
        let delta = Delta::set("i-1", 4, "weights", "0.5");
        let err = delta.apply(&base()).unwrap_err();
        assert_eq!(
            err,
            DeltaError::MissingAttribute {
                attribute: "weights".to_string()
            }
        );
    }

    #[test]
    fn apply_rejects_non_advancing_version() {
        let delta = Delta::set("i-1", 3, attrs::ZONE, "us-west");
        assert!(matches!(
            delta.apply(&base()),
            Err(DeltaError::VersionRegression {
                offered: 3,
                current: 3
            })
        ));
    }

    #[test]
    fn apply_rejects_foreign_instance() {
        let delta = Delta::set("i-2", 4, attrs::ZONE, "us-west");
        assert!(matches!(
            delta.apply(&base()),
            Err(DeltaError::IdMismatch { .. })
        ));
    }
}
