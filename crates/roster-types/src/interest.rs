//! Interest predicates
//!
//! An `Interest` selects which instances a subscriber cares about.
//! Evaluation is pure; composition is by union.

use serde::{Deserialize, Serialize};

use crate::instance::InstanceInfo;

/// A predicate over instances, used to filter notification streams and
/// snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interest {
    /// Matches nothing.
    None,

    /// Matches every instance.
    Full,

    /// Matches the instance with exactly this id.
    ById(String),

    /// Matches instances whose `app` attribute equals the given name.
    ByApp(String),

    /// Matches instances whose `vip` attribute equals the given address.
    ByVip(String),

    /// Union of the contained interests.
    Any(Vec<Interest>),
}

impl Interest {
    pub fn by_id(id: impl Into<String>) -> Self {
        Interest::ById(id.into())
    }

    pub fn by_app(app: impl Into<String>) -> Self {
        Interest::ByApp(app.into())
    }

    pub fn by_vip(vip: impl Into<String>) -> Self {
        Interest::ByVip(vip.into())
    }

    /// Build the union of `members`, simplifying as it goes: nested unions
    /// are flattened, `None` members are dropped, a `Full` member absorbs
    /// the rest, and duplicates collapse.
    pub fn any(members: impl IntoIterator<Item = Interest>) -> Self {
        let mut flat = Vec::new();
        for member in members {
            match member {
                Interest::None => {}
                Interest::Full => return Interest::Full,
                Interest::Any(inner) => {
                    for interest in inner {
                        if interest == Interest::Full {
                            return Interest::Full;
                        }
                        if interest != Interest::None && !flat.contains(&interest) {
                            flat.push(interest);
                        }
                    }
                }
                other => {
                    if !flat.contains(&other) {
                        flat.push(other);
                    }
                }
            }
        }
        match flat.len() {
            0 => Interest::None,
            1 => flat.remove(0),
            _ => Interest::Any(flat),
        }
    }

    /// Evaluate the predicate against one instance.
    pub fn matches(&self, info: &InstanceInfo) -> bool {
        match self {
            Interest::None => false,
            Interest::Full => true,
            Interest::ById(id) => info.id() == id,
            Interest::ByApp(app) => info.app_name() == Some(app.as_str()),
            Interest::ByVip(vip) => info.vip_address() == Some(vip.as_str()),
            Interest::Any(members) => members.iter().any(|m| m.matches(info)),
        }
    }
}
