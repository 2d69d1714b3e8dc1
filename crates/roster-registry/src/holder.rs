//! Multi-sourced data holder.
//!
//! One holder exists per instance id. It keeps one copy of the instance per
//! source, exposes the copy chosen by the selection policy as the selected
//! view, and turns every externally visible transition into a
//! [`ChangeNotification`].
//!
//! Holders are owned by the registry and mutated only under the registry's
//! per-id serialization; nothing here locks.

use std::collections::HashMap;
use std::sync::Arc;

use roster_types::{ChangeNotification, Delta, InstanceInfo, Source};
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::selector::SourceSelector;

/// Read-only view of a holder, handed out to external callers.
#[derive(Debug, Clone)]
pub struct HolderSnapshot {
    pub id: String,
    pub selected_source: Option<Source>,
    pub selected: Option<InstanceInfo>,
    pub sources: Vec<Source>,
    pub holder_version: u64,
}

/// Per-id container reconciling concurrent claims from distinct sources.
pub struct InstanceHolder {
    id: String,
    copies: HashMap<Source, InstanceInfo>,
    selected: Option<Source>,
    holder_version: u64,
    selector: Arc<dyn SourceSelector>,
    detached: bool,
}

impl InstanceHolder {
    pub(crate) fn new(id: impl Into<String>, selector: Arc<dyn SourceSelector>) -> Self {
        Self {
            id: id.into(),
            copies: HashMap::new(),
            selected: None,
            holder_version: 0,
            selector,
            detached: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The selected view, or `None` when the holder is empty.
    pub fn get(&self) -> Option<&InstanceInfo> {
        self.selected.as_ref().and_then(|s| self.copies.get(s))
    }

    pub fn selected_source(&self) -> Option<&Source> {
        self.selected.as_ref()
    }

    /// Number of copies held.
    pub fn size(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Monotonic counter, incremented on every externally visible change.
    pub fn version(&self) -> u64 {
        self.holder_version
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.copies.keys()
    }

    pub fn snapshot(&self) -> HolderSnapshot {
        HolderSnapshot {
            id: self.id.clone(),
            selected_source: self.selected.clone(),
            selected: self.get().cloned(),
            sources: self.copies.keys().cloned().collect(),
            holder_version: self.holder_version,
        }
    }

    /// Set the copy for `source` and recompute the selected view.
    ///
    /// Returns the notification describing the transition: `Add` when the
    /// holder was empty, `Modify` when the selected view changed, `None`
    /// when only a non-selected copy moved. Re-registering a copy that is
    /// structurally identical to the held one is a no-op; any other
    /// non-advancing version is rejected as stale.
    pub fn update(&mut self, source: Source, info: InstanceInfo) -> Result<Option<ChangeNotification>> {
        self.apply_update(source, info, None)
    }

    /// Like [`update`](Self::update), but when the updating source ends up
    /// selected the supplied deltas seed the `Modify` notification verbatim
    /// instead of being recomputed.
    pub fn update_with_deltas(
        &mut self,
        source: Source,
        info: InstanceInfo,
        deltas: Vec<Delta>,
    ) -> Result<Option<ChangeNotification>> {
        if let Some(existing) = self.copies.get(&source) {
            for delta in &deltas {
                if existing.attribute(delta.attribute()).is_none() {
                    return Err(RegistryError::MalformedDelta {
                        id: self.id.clone(),
                        attribute: delta.attribute().to_string(),
                    });
                }
            }
        }
        self.apply_update(source, info, Some(deltas))
    }

    fn apply_update(
        &mut self,
        source: Source,
        info: InstanceInfo,
        deltas: Option<Vec<Delta>>,
    ) -> Result<Option<ChangeNotification>> {
        if info.id() != self.id {
            return Err(RegistryError::Internal(format!(
                "holder {} offered instance {}",
                self.id,
                info.id()
            )));
        }

        if let Some(existing) = self.copies.get(&source) {
            if *existing == info {
                // Idempotent re-registration.
                return Ok(None);
            }
            if info.version() <= existing.version() {
                return Err(RegistryError::StaleVersion {
                    id: self.id.clone(),
                    source,
                    offered: info.version(),
                    current: existing.version(),
                });
            }
        }

        let prior = self.get().cloned();
        self.copies.insert(source.clone(), info);
        self.reselect()?;

        let current = match self.get() {
            Some(current) => current.clone(),
            None => {
                return Err(RegistryError::Internal(format!(
                    "holder {} has copies but no selected view",
                    self.id
                )))
            }
        };

        let notification = match prior {
            None => Some(ChangeNotification::Add(current)),
            Some(prior) if prior != current => {
                let deltas = match deltas {
                    Some(deltas) if self.selected.as_ref() == Some(&source) => deltas,
                    _ => prior.diff(&current),
                };
                Some(ChangeNotification::Modify {
                    info: current,
                    deltas,
                })
            }
            Some(_) => None,
        };

        if notification.is_some() {
            self.holder_version += 1;
            debug!(id = %self.id, holder_version = self.holder_version, "holder view changed");
        }
        Ok(notification)
    }

    /// Remove the copy for `source` and recompute the selected view.
    ///
    /// Emits `Delete` of the prior view when the last copy goes away, a
    /// full-diff `Modify` when selection fails over to a surviving copy,
    /// nothing when a non-selected copy was removed.
    pub fn remove(&mut self, source: &Source) -> Result<Option<ChangeNotification>> {
        if !self.copies.contains_key(source) {
            return Ok(None);
        }

        let prior = self
            .get()
            .cloned()
            .ok_or_else(|| RegistryError::Internal(format!("holder {} lost its view", self.id)))?;

        self.copies.remove(source);

        if self.copies.is_empty() {
            self.selected = None;
            self.holder_version += 1;
            debug!(id = %self.id, "holder emptied");
            return Ok(Some(ChangeNotification::Delete(prior)));
        }

        self.reselect()?;
        let current = match self.get() {
            Some(current) => current.clone(),
            None => {
                return Err(RegistryError::Internal(format!(
                    "holder {} has copies but no selected view",
                    self.id
                )))
            }
        };

        if current != prior {
            self.holder_version += 1;
            let deltas = prior.diff(&current);
            Ok(Some(ChangeNotification::Modify {
                info: current,
                deltas,
            }))
        } else {
            Ok(None)
        }
    }

    fn reselect(&mut self) -> Result<()> {
        self.selected = self.selector.select(&self.copies).cloned();
        match &self.selected {
            Some(selected) if !self.copies.contains_key(selected) => {
                Err(RegistryError::Internal(format!(
                    "selector chose source {selected} not present on holder {}",
                    self.id
                )))
            }
            None if !self.copies.is_empty() => Err(RegistryError::Internal(format!(
                "selector chose nothing for non-empty holder {}",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    /// True once the registry dropped this holder from its map. A detached
    /// holder must not be mutated; callers retry against the map.
    pub(crate) fn is_detached(&self) -> bool {
        self.detached
    }

    pub(crate) fn detach(&mut self) {
        self.detached = true;
    }
}
