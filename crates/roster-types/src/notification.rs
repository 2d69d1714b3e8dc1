//! Change notifications
//!
//! The registry turns every observable holder transition into a
//! `ChangeNotification` on its broadcast bus. Subscriptions additionally see
//! a `BufferSentinel` marking the boundary between their initial snapshot
//! and the live tail.

use serde::{Deserialize, Serialize};

use crate::delta::Delta;
use crate::instance::InstanceInfo;

/// Kind discriminant for [`ChangeNotification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Add,
    Modify,
    Delete,
    BufferSentinel,
}

/// One registry transition as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeNotification {
    /// An instance became visible (new holder, or first matching view).
    Add(InstanceInfo),

    /// The selected view of an existing instance changed.
    Modify {
        info: InstanceInfo,
        deltas: Vec<Delta>,
    },

    /// The instance disappeared; carries the last selected view.
    Delete(InstanceInfo),

    /// Synthetic marker: everything before this was the initial snapshot.
    BufferSentinel,
}

impl ChangeNotification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            ChangeNotification::Add(_) => NotificationKind::Add,
            ChangeNotification::Modify { .. } => NotificationKind::Modify,
            ChangeNotification::Delete(_) => NotificationKind::Delete,
            ChangeNotification::BufferSentinel => NotificationKind::BufferSentinel,
        }
    }

    /// The instance the notification is about, if it carries one.
    pub fn instance(&self) -> Option<&InstanceInfo> {
        match self {
            ChangeNotification::Add(info)
            | ChangeNotification::Modify { info, .. }
            | ChangeNotification::Delete(info) => Some(info),
            ChangeNotification::BufferSentinel => None,
        }
    }

    /// True for Add/Modify/Delete, false for the sentinel.
    pub fn is_data(&self) -> bool {
        !matches!(self, ChangeNotification::BufferSentinel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_instance_accessors() {
        let info = InstanceInfo::builder("i-1").version(1).build();

        let add = ChangeNotification::Add(info.clone());
        assert_eq!(add.kind(), NotificationKind::Add);
        assert_eq!(add.instance().map(|i| i.id()), Some("i-1"));

        let sentinel = ChangeNotification::BufferSentinel;
        assert_eq!(sentinel.kind(), NotificationKind::BufferSentinel);
        assert!(sentinel.instance().is_none());
        assert!(!sentinel.is_data());
    }
}
