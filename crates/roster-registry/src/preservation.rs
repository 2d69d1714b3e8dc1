//! Preservation / eviction controller.
//!
//! When a whole source disappears (a replication peer drops, a bootstrap
//! load is superseded), its registrations become eviction candidates. They
//! are not removed immediately: candidates queue here and are released only
//! as an external quota source grants room. Under suspected mass failure
//! the quota can be held at zero and the registry is preserved as-is.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use roster_types::Source;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::metrics::RegistryMetrics;
use crate::registry::SourcedRegistry;

/// External source of eviction quota grants.
///
/// Each grant authorizes up to that many evictions against the queue as it
/// stands at delivery; unused quota is discarded, never banked. `None` ends
/// the stream and stops eviction until shutdown.
#[async_trait]
pub trait EvictionQuotaSource: Send + 'static {
    async fn next_quota(&mut self) -> Option<u32>;
}

#[async_trait]
impl EvictionQuotaSource for mpsc::Receiver<u32> {
    async fn next_quota(&mut self) -> Option<u32> {
        self.recv().await
    }
}

/// One copy awaiting eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EvictionRecord {
    pub id: String,
    pub source: Source,
}

/// FIFO queue of eviction candidates, drained by the quota worker.
pub(crate) struct EvictionController {
    queue: Mutex<VecDeque<EvictionRecord>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<RegistryMetrics>,
}

impl EvictionController {
    pub(crate) fn new(metrics: Arc<RegistryMetrics>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            worker: Mutex::new(None),
            metrics,
        })
    }

    /// Start the quota worker. `initial` is a synthetic grant applied before
    /// the first pull from the quota source.
    pub(crate) fn start(
        self: &Arc<Self>,
        registry: Weak<SourcedRegistry>,
        mut quota: impl EvictionQuotaSource,
        initial: u32,
    ) {
        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut grant = initial as usize;
            loop {
                let batch = controller.take(grant);
                if !batch.is_empty() {
                    let Some(registry) = registry.upgrade() else {
                        return;
                    };
                    for record in batch {
                        registry.complete_eviction(record);
                    }
                }
                grant = match quota.next_quota().await {
                    Some(quota) => quota as usize,
                    None => {
                        debug!("eviction quota source completed");
                        return;
                    }
                };
            }
        });
        *self.worker.lock().unwrap() = Some(handle);
    }

    pub(crate) fn enqueue(&self, records: Vec<EvictionRecord>) {
        if records.is_empty() {
            return;
        }
        let depth = {
            let mut queue = self.queue.lock().unwrap();
            queue.extend(records);
            queue.len()
        };
        self.metrics.set_eviction_queue_depth(depth as i64);
    }

    /// Dequeue up to `limit` records. Grants apply only to what is queued
    /// right now.
    fn take(&self, limit: usize) -> Vec<EvictionRecord> {
        if limit == 0 {
            return Vec::new();
        }
        let (batch, depth) = {
            let mut queue = self.queue.lock().unwrap();
            let count = limit.min(queue.len());
            let batch: Vec<EvictionRecord> = queue.drain(..count).collect();
            (batch, queue.len())
        };
        self.metrics.set_eviction_queue_depth(depth as i64);
        batch
    }

    /// Everything still queued. Used on shutdown to complete pending
    /// evictions synchronously.
    pub(crate) fn drain_all(&self) -> Vec<EvictionRecord> {
        let batch: Vec<EvictionRecord> = {
            let mut queue = self.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        self.metrics.set_eviction_queue_depth(0);
        batch
    }

    /// Cancel the quota worker.
    pub(crate) fn stop(&self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}
