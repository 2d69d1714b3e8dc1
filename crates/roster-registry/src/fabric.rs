//! Notification fabric.
//!
//! Routes change notifications from the mutation path to subscribers, each
//! filtered by interest and originating source. Publication never blocks:
//! subscribers own bounded buffers, and a subscriber that falls behind its
//! high watermark is terminated instead of slowing the registry down.
//!
//! Subscriptions begin with a consistent snapshot, then a
//! [`ChangeNotification::BufferSentinel`], then the live tail. The join is
//! done per subscriber by a pump task that squashes whatever raced with the
//! snapshot capture.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use dashmap::DashMap;
use roster_types::{ChangeNotification, InstanceInfo, Interest, Source, SourceFilter};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::metrics::RegistryMetrics;

/// A subscriber's live tap into the bus.
struct Subscriber {
    interest: Interest,
    filter: SourceFilter,
    tap: mpsc::Sender<ChangeNotification>,
    terminal: Arc<OnceLock<RegistryError>>,
}

impl Subscriber {
    fn wants(&self, source: &Source, notification: &ChangeNotification) -> bool {
        if !self.filter.matches(source) {
            return false;
        }
        match notification.instance() {
            Some(info) => self.interest.matches(info),
            None => false,
        }
    }
}

/// An interest-filtered notification stream.
///
/// Yields the initial snapshot as `Add`s, then the sentinel, then live
/// notifications. After the stream ends, [`error`](Self::error) reports
/// whether it terminated abnormally (slow consumer, registry shutdown).
pub struct InterestSubscription {
    id: Uuid,
    rx: mpsc::Receiver<ChangeNotification>,
    terminal: Arc<OnceLock<RegistryError>>,
}

impl InterestSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next notification, or `None` once the stream has terminated.
    pub async fn next(&mut self) -> Option<ChangeNotification> {
        self.rx.recv().await
    }

    /// The terminal error, if the subscription was ended abnormally.
    pub fn error(&self) -> Option<RegistryError> {
        self.terminal.get().cloned()
    }
}

impl futures_util::Stream for InterestSubscription {
    type Item = ChangeNotification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A registered tap that has not started streaming yet. The registry
/// captures its snapshot between registration and activation so no
/// notification can fall between the two.
pub(crate) struct PendingSubscription {
    id: Uuid,
    tap_rx: mpsc::Receiver<ChangeNotification>,
    out_tx: mpsc::Sender<ChangeNotification>,
    out_rx: mpsc::Receiver<ChangeNotification>,
    terminal: Arc<OnceLock<RegistryError>>,
}

impl PendingSubscription {
    /// Spawn the snapshot/live pump and hand the stream to the caller.
    pub(crate) fn activate(self, snapshot: Vec<InstanceInfo>) -> InterestSubscription {
        let subscription = InterestSubscription {
            id: self.id,
            rx: self.out_rx,
            terminal: self.terminal,
        };
        tokio::spawn(pump(snapshot, self.tap_rx, self.out_tx));
        subscription
    }
}

/// Snapshot-then-live join: emit the snapshot, mark the boundary, squash the
/// buffered race window, then stream.
async fn pump(
    snapshot: Vec<InstanceInfo>,
    mut tap: mpsc::Receiver<ChangeNotification>,
    out: mpsc::Sender<ChangeNotification>,
) {
    let mut known: HashSet<String> = snapshot.iter().map(|info| info.id().to_string()).collect();

    for info in snapshot {
        if out.send(ChangeNotification::Add(info)).await.is_err() {
            return;
        }
    }
    if out.send(ChangeNotification::BufferSentinel).await.is_err() {
        return;
    }

    // Everything already sitting in the tap raced with the snapshot capture
    // and may duplicate or predate it.
    loop {
        match tap.try_recv() {
            Ok(notification) => {
                if let Some(reconciled) = reconcile_buffered(&mut known, notification) {
                    if out.send(reconciled).await.is_err() {
                        return;
                    }
                }
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => return,
        }
    }

    while let Some(notification) = tap.recv().await {
        if out.send(notification).await.is_err() {
            return;
        }
    }
}

/// Duplicate-suppression for the buffered window. `known` is the set of ids
/// the subscriber has already been told exist.
fn reconcile_buffered(
    known: &mut HashSet<String>,
    notification: ChangeNotification,
) -> Option<ChangeNotification> {
    match notification {
        ChangeNotification::Add(info) => {
            if known.contains(info.id()) {
                None
            } else {
                known.insert(info.id().to_string());
                Some(ChangeNotification::Add(info))
            }
        }
        ChangeNotification::Modify { info, deltas } => {
            if known.contains(info.id()) {
                Some(ChangeNotification::Modify { info, deltas })
            } else {
                known.insert(info.id().to_string());
                Some(ChangeNotification::Add(info))
            }
        }
        ChangeNotification::Delete(info) => {
            if known.remove(info.id()) {
                Some(ChangeNotification::Delete(info))
            } else {
                None
            }
        }
        ChangeNotification::BufferSentinel => None,
    }
}

/// The subscriber table plus non-blocking publication.
pub(crate) struct NotificationFabric {
    subscribers: DashMap<Uuid, Subscriber>,
    buffer_capacity: usize,
    metrics: Arc<RegistryMetrics>,
}

impl NotificationFabric {
    pub(crate) fn new(buffer_capacity: usize, metrics: Arc<RegistryMetrics>) -> Self {
        Self {
            subscribers: DashMap::new(),
            buffer_capacity,
            metrics,
        }
    }

    /// Register a tap. Live notifications start buffering immediately; the
    /// caller captures its snapshot next and then activates the pending
    /// subscription.
    pub(crate) fn subscribe(&self, interest: Interest, filter: SourceFilter) -> PendingSubscription {
        let id = Uuid::new_v4();
        let (tap_tx, tap_rx) = mpsc::channel(self.buffer_capacity);
        let (out_tx, out_rx) = mpsc::channel(self.buffer_capacity);
        let terminal = Arc::new(OnceLock::new());

        self.subscribers.insert(
            id,
            Subscriber {
                interest,
                filter,
                tap: tap_tx,
                terminal: terminal.clone(),
            },
        );
        self.metrics.set_subscribers(self.subscribers.len() as i64);
        debug!(subscription_id = %id, "subscription registered");

        PendingSubscription {
            id,
            tap_rx,
            out_tx,
            out_rx,
            terminal,
        }
    }

    /// Fan a notification out to every matching subscriber. Never blocks;
    /// a full tap terminates that subscriber with a slow-consumer error.
    pub(crate) fn publish(&self, source: &Source, notification: &ChangeNotification) {
        let mut dead = Vec::new();
        let mut buffered: i64 = 0;

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.wants(source, notification) {
                continue;
            }
            match subscriber.tap.try_send(notification.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscription_id = %entry.key(),
                        "subscriber buffer overran its high watermark, terminating"
                    );
                    let _ = subscriber.terminal.set(RegistryError::SlowConsumer {
                        subscription: *entry.key(),
                    });
                    dead.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
            buffered +=
                (subscriber.tap.max_capacity() - subscriber.tap.capacity()) as i64;
        }

        if !dead.is_empty() {
            for id in dead {
                self.subscribers.remove(&id);
            }
            self.metrics.set_subscribers(self.subscribers.len() as i64);
        }
        self.metrics.set_buffered_notifications(buffered);
    }

    /// Terminate every subscription with the given error. Used on registry
    /// shutdown.
    pub(crate) fn terminate_all(&self, error: &RegistryError) {
        let ids: Vec<Uuid> = self.subscribers.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, subscriber)) = self.subscribers.remove(&id) {
                let _ = subscriber.terminal.set(error.clone());
            }
        }
        self.metrics.set_subscribers(0);
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
