//! Lifecycle reporting.
//!
//! Long-lived components (the registry, replication channels) expose a
//! lifecycle stream that stays `Active` while the component runs, then
//! transitions exactly once to `Completed` or `Failed`.

use tokio::sync::watch;

/// Terminal-state stream value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    /// The component is running.
    Active,

    /// The component shut down cleanly.
    Completed,

    /// The component terminated with an error.
    Failed(String),
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LifecycleState::Active)
    }
}

/// Write side of a lifecycle stream. The first terminal transition wins;
/// later transitions are ignored.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Active);
        Self { tx }
    }

    /// Subscribe to lifecycle transitions. The receiver observes the
    /// current state immediately.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        self.tx.borrow().clone()
    }

    /// Mark clean completion.
    pub fn complete(&self) {
        self.transition(LifecycleState::Completed);
    }

    /// Mark abnormal termination.
    pub fn fail(&self, reason: impl Into<String>) {
        self.transition(LifecycleState::Failed(reason.into()));
    }

    fn transition(&self, next: LifecycleState) {
        self.tx.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = next.clone();
            true
        });
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
