//! The sourced registry.
//!
//! Owns the id-to-holder map, serializes mutations per instance id, and
//! publishes every observable transition to the notification fabric.
//! Distinct ids progress independently: the map is a [`DashMap`] and each
//! holder carries its own lock; there is no global mutation lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use prometheus::Registry as MetricsRegistry;
use roster_types::{Delta, InstanceInfo, Interest, Source, SourceFilter};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::fabric::{InterestSubscription, NotificationFabric};
use crate::holder::{HolderSnapshot, InstanceHolder};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::metrics::RegistryMetrics;
use crate::preservation::{EvictionController, EvictionQuotaSource, EvictionRecord};
use crate::selector::{OriginSelector, SourceSelector};

/// Multi-sourced instance registry with interest-filtered change streams.
///
/// Construct with [`SourcedRegistry::new`] from inside a Tokio runtime (the
/// eviction controller spawns its quota worker at construction).
pub struct SourcedRegistry {
    holders: DashMap<String, Arc<Mutex<InstanceHolder>>>,
    fabric: NotificationFabric,
    evictions: Arc<EvictionController>,
    metrics: Arc<RegistryMetrics>,
    selector: Arc<dyn SourceSelector>,
    lifecycle: Lifecycle,
    closed: AtomicBool,
}

impl SourcedRegistry {
    /// Create a registry with the default origin-based selection policy.
    pub fn new(
        config: RegistryConfig,
        quota: impl EvictionQuotaSource,
        metrics_registry: &MetricsRegistry,
    ) -> Arc<Self> {
        Self::with_selector(config, Arc::new(OriginSelector), quota, metrics_registry)
    }

    /// Create a registry with a custom source selection policy.
    pub fn with_selector(
        config: RegistryConfig,
        selector: Arc<dyn SourceSelector>,
        quota: impl EvictionQuotaSource,
        metrics_registry: &MetricsRegistry,
    ) -> Arc<Self> {
        let metrics = Arc::new(RegistryMetrics::new(metrics_registry));
        let fabric = NotificationFabric::new(
            config.subscriber_buffer_high_watermark,
            Arc::clone(&metrics),
        );
        let evictions = EvictionController::new(Arc::clone(&metrics));

        let registry = Arc::new(Self {
            holders: DashMap::new(),
            fabric,
            evictions: Arc::clone(&evictions),
            metrics,
            selector,
            lifecycle: Lifecycle::new(),
            closed: AtomicBool::new(false),
        });

        evictions.start(
            Arc::downgrade(&registry),
            quota,
            config.eviction_quota_initial,
        );
        registry
    }

    /// Upsert the copy of `info` held for `source`.
    ///
    /// Returns `true` iff this call created the holder.
    pub async fn register(&self, info: InstanceInfo, source: Source) -> Result<bool> {
        self.ensure_open()?;
        let created = self.mutate(info, source, None)?;
        self.metrics.record_registration();
        Ok(created)
    }

    /// Like [`register`](Self::register), but when the updating source is
    /// the selected one the supplied deltas seed the `Modify` notification
    /// verbatim.
    pub async fn update(
        &self,
        info: InstanceInfo,
        deltas: Vec<Delta>,
        source: Source,
    ) -> Result<bool> {
        self.ensure_open()?;
        let created = self.mutate(info, source, Some(deltas))?;
        self.metrics.record_update();
        Ok(created)
    }

    /// Remove the copy of `info` held for `source`.
    ///
    /// Returns `true` iff this removed the holder's last copy.
    pub async fn unregister(&self, info: &InstanceInfo, source: &Source) -> Result<bool> {
        self.unregister_id(info.id(), source).await
    }

    /// Remove a copy by instance id, for callers that only have the id
    /// (inbound replication unregisters carry no instance body).
    pub async fn unregister_id(&self, id: &str, source: &Source) -> Result<bool> {
        self.ensure_open()?;
        self.remove_copy(id, source, false)
    }

    /// The currently selected views matching `interest`.
    pub async fn for_snapshot(&self, interest: &Interest) -> Result<Vec<InstanceInfo>> {
        self.ensure_open()?;
        Ok(self.collect_snapshot(interest))
    }

    /// Subscribe to changes matching `interest` from any source.
    pub async fn for_interest(&self, interest: Interest) -> Result<InterestSubscription> {
        self.for_interest_from(interest, SourceFilter::Any).await
    }

    /// Subscribe to changes matching `interest`, restricted to mutations
    /// whose originating source matches `filter`. Replication channels use
    /// this to avoid echoing a peer's own updates back at it.
    pub async fn for_interest_from(
        &self,
        interest: Interest,
        filter: SourceFilter,
    ) -> Result<InterestSubscription> {
        self.ensure_open()?;
        // Register the tap first: anything published from here on is either
        // buffered on the tap or visible to the snapshot, never lost.
        let pending = self.fabric.subscribe(interest.clone(), filter);
        let snapshot = self.collect_snapshot(&interest);
        Ok(pending.activate(snapshot))
    }

    /// Queue every copy whose source matches `filter` for eviction through
    /// the quota controller. Returns the number of holders touched.
    pub async fn evict_all(&self, filter: SourceFilter) -> Result<usize> {
        self.ensure_open()?;

        let mut records = Vec::new();
        let mut touched = 0;
        for entry in self.holders.iter() {
            let guard = entry.value().lock().unwrap();
            let matching: Vec<Source> = guard
                .sources()
                .filter(|source| filter.matches(source))
                .cloned()
                .collect();
            if !matching.is_empty() {
                touched += 1;
                records.extend(matching.into_iter().map(|source| EvictionRecord {
                    id: guard.id().to_string(),
                    source,
                }));
            }
        }

        info!(touched, "queued holders for eviction");
        self.evictions.enqueue(records);
        Ok(touched)
    }

    /// Read-only snapshots of every current holder.
    pub fn holders(&self) -> Vec<HolderSnapshot> {
        self.holders
            .iter()
            .map(|entry| entry.value().lock().unwrap().snapshot())
            .collect()
    }

    /// Number of holders currently in the registry.
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Lifecycle stream: `Active` while running, then `Completed` on clean
    /// shutdown or `Failed` on invariant violation.
    pub fn lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Shut the registry down: cancel the quota worker, complete queued
    /// evictions, terminate all subscriptions, reject further mutations.
    /// Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown_inner(None);
    }

    /// Shut down reporting a failure through the lifecycle stream.
    pub async fn shutdown_with(&self, error: RegistryError) {
        self.shutdown_inner(Some(error.to_string()));
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RegistryError::LifecycleClosed)
        } else {
            Ok(())
        }
    }

    fn collect_snapshot(&self, interest: &Interest) -> Vec<InstanceInfo> {
        self.holders
            .iter()
            .filter_map(|entry| {
                let guard = entry.value().lock().unwrap();
                guard.get().filter(|info| interest.matches(info)).cloned()
            })
            .collect()
    }

    fn mutate(&self, info: InstanceInfo, source: Source, deltas: Option<Vec<Delta>>) -> Result<bool> {
        let id = info.id().to_string();
        loop {
            let holder = self
                .holders
                .entry(id.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(InstanceHolder::new(
                        id.clone(),
                        Arc::clone(&self.selector),
                    )))
                })
                .clone();

            let mut guard = holder.lock().unwrap();
            if guard.is_detached() {
                // Lost a race with holder destruction; the map entry is
                // gone, take a fresh one.
                continue;
            }

            let created = guard.is_empty();
            let result = match &deltas {
                None => guard.update(source.clone(), info.clone()),
                Some(deltas) => {
                    guard.update_with_deltas(source.clone(), info.clone(), deltas.clone())
                }
            };

            match result {
                Ok(Some(notification)) => self.fabric.publish(&source, &notification),
                Ok(None) => {}
                Err(err) => {
                    drop(guard);
                    if created {
                        self.drop_if_empty(&id);
                    }
                    return Err(self.escalate(err));
                }
            }
            drop(guard);

            if created {
                self.metrics.set_instances(self.holders.len() as i64);
            }
            return Ok(created);
        }
    }

    fn remove_copy(&self, id: &str, source: &Source, evicting: bool) -> Result<bool> {
        let holder = match self.holders.get(id) {
            Some(entry) => Arc::clone(entry.value()),
            None => return Ok(false),
        };

        let mut guard = holder.lock().unwrap();
        if guard.is_detached() || !guard.sources().any(|s| s == source) {
            return Ok(false);
        }

        let notification = match guard.remove(source) {
            Ok(notification) => notification,
            Err(err) => {
                drop(guard);
                return Err(self.escalate(err));
            }
        };
        let destroyed = guard.is_empty();
        if let Some(notification) = &notification {
            self.fabric.publish(source, notification);
        }
        drop(guard);

        if destroyed {
            self.drop_if_empty(id);
            self.metrics.set_instances(self.holders.len() as i64);
        }
        if evicting {
            self.metrics.record_eviction();
        } else {
            self.metrics.record_unregister();
        }
        Ok(destroyed)
    }

    /// Remove the map entry for `id` if its holder is empty, detaching the
    /// holder so racing mutators retry against a fresh entry.
    fn drop_if_empty(&self, id: &str) {
        self.holders.remove_if(id, |_, holder| {
            let mut guard = holder.lock().unwrap();
            if guard.is_empty() {
                guard.detach();
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn complete_eviction(&self, record: EvictionRecord) {
        if let Err(err) = self.remove_copy(&record.id, &record.source, true) {
            warn!(
                id = %record.id,
                source = %record.source,
                error = %err,
                "eviction failed"
            );
        }
    }

    fn escalate(&self, err: RegistryError) -> RegistryError {
        if matches!(err, RegistryError::Internal(_)) {
            error!(error = %err, "registry invariant violated, shutting down");
            self.shutdown_inner(Some(err.to_string()));
        }
        err
    }

    fn shutdown_inner(&self, failure: Option<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.evictions.stop();
        for record in self.evictions.drain_all() {
            self.complete_eviction(record);
        }
        self.fabric.terminate_all(&RegistryError::LifecycleClosed);

        match failure {
            None => {
                info!("registry shut down");
                self.lifecycle.complete();
            }
            Some(reason) => {
                error!(reason = %reason, "registry shut down abnormally");
                self.lifecycle.fail(reason);
            }
        }
    }
}

impl Drop for SourcedRegistry {
    fn drop(&mut self) {
        self.evictions.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_types::{attrs, ChangeNotification, NotificationKind};
    use tokio::sync::mpsc;

    fn new_registry() -> (Arc<SourcedRegistry>, mpsc::Sender<u32>) {
        let (quota_tx, quota_rx) = mpsc::channel(16);
        let registry = SourcedRegistry::new(
            RegistryConfig::default(),
            quota_rx,
            &MetricsRegistry::new(),
        );
        (registry, quota_tx)
    }

    fn info(id: &str, version: u64, zone: &str) -> InstanceInfo {
        InstanceInfo::builder(id)
            .version(version)
            .app("search")
            .zone(zone)
            .build()
    }

    #[tokio::test]
    async fn register_reports_holder_creation() {
        let (registry, _quota) = new_registry();

        let created = registry
            .register(info("a", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();
        assert!(created);

        let created = registry
            .register(info("a", 2, "us-west"), Source::local("srv"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unregister_reports_holder_destruction() {
        let (registry, _quota) = new_registry();
        let source = Source::local("srv");
        registry
            .register(info("a", 1, "us-east"), source.clone())
            .await
            .unwrap();
        registry
            .register(info("a", 5, "us-east"), Source::replicated("peer"))
            .await
            .unwrap();

        let destroyed = registry
            .unregister(&info("a", 1, "us-east"), &source)
            .await
            .unwrap();
        assert!(!destroyed);

        let destroyed = registry
            .unregister_id("a", &Source::replicated("peer"))
            .await
            .unwrap();
        assert!(destroyed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unregister_of_unknown_instance_is_false() {
        let (registry, _quota) = new_registry();
        let destroyed = registry
            .unregister_id("ghost", &Source::local("srv"))
            .await
            .unwrap();
        assert!(!destroyed);
    }

    #[tokio::test]
    async fn stale_register_surfaces_and_changes_nothing() {
        let (registry, _quota) = new_registry();
        let source = Source::local("srv");
        registry
            .register(info("a", 3, "us-east"), source.clone())
            .await
            .unwrap();

        let err = registry
            .register(info("a", 2, "us-west"), source)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::StaleVersion { .. }));

        let holders = registry.holders();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].selected.as_ref().unwrap().version(), 3);
        // A domain error never takes the registry down.
        assert_eq!(registry.lifecycle.state(), LifecycleState::Active);
    }

    #[tokio::test]
    async fn snapshot_filters_by_interest() {
        let (registry, _quota) = new_registry();
        registry
            .register(info("a", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();
        let billing = InstanceInfo::builder("b").version(1).app("billing").build();
        registry
            .register(billing, Source::local("srv"))
            .await
            .unwrap();

        let matched = registry
            .for_snapshot(&Interest::by_app("search"))
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id(), "a");

        let all = registry.for_snapshot(&Interest::Full).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn update_seeds_modify_with_the_supplied_deltas() {
        let (registry, _quota) = new_registry();
        let source = Source::local("srv");
        registry
            .register(info("a", 1, "us-east"), source.clone())
            .await
            .unwrap();

        let mut sub = registry.for_interest(Interest::Full).await.unwrap();
        // Drain snapshot + sentinel.
        assert_eq!(sub.next().await.unwrap().kind(), NotificationKind::Add);
        assert_eq!(
            sub.next().await.unwrap(),
            ChangeNotification::BufferSentinel
        );

        let deltas = vec![Delta::set("a", 2, attrs::ZONE, "us-west")];
        registry
            .update(info("a", 2, "us-west"), deltas.clone(), source)
            .await
            .unwrap();

        match sub.next().await.unwrap() {
            ChangeNotification::Modify { deltas: emitted, .. } => assert_eq!(emitted, deltas),
            other => panic!("expected Modify, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_closes_everything() {
        let (registry, _quota) = new_registry();
        registry
            .register(info("a", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();
        let mut sub = registry.for_interest(Interest::Full).await.unwrap();
        let mut lifecycle = registry.lifecycle();

        registry.shutdown().await;
        registry.shutdown().await;

        assert_eq!(*lifecycle.borrow_and_update(), LifecycleState::Completed);
        assert!(matches!(
            registry
                .register(info("b", 1, "us-east"), Source::local("srv"))
                .await,
            Err(RegistryError::LifecycleClosed)
        ));
        assert!(matches!(
            registry.for_interest(Interest::Full).await,
            Err(RegistryError::LifecycleClosed)
        ));

        // The subscription drains and then reports the lifecycle error.
        while sub.next().await.is_some() {}
        assert_eq!(sub.error(), Some(RegistryError::LifecycleClosed));
    }

    #[tokio::test]
    async fn shutdown_completes_queued_evictions() {
        let (registry, _quota) = new_registry();
        let peer = Source::replicated("peer");
        for n in 0..4 {
            registry
                .register(info(&format!("i-{n}"), 1, "us-east"), peer.clone())
                .await
                .unwrap();
        }

        // No quota granted: evictions stay queued.
        let touched = registry
            .evict_all(SourceFilter::Exact(peer))
            .await
            .unwrap();
        assert_eq!(touched, 4);
        assert_eq!(registry.len(), 4);

        registry.shutdown().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn evict_all_counts_holders_not_copies() {
        let (registry, _quota) = new_registry();
        registry
            .register(info("a", 1, "us-east"), Source::replicated("p1"))
            .await
            .unwrap();
        registry
            .register(info("a", 2, "us-east"), Source::replicated("p2"))
            .await
            .unwrap();
        registry
            .register(info("b", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();

        let touched = registry
            .evict_all(SourceFilter::Origin(roster_types::Origin::Replicated))
            .await
            .unwrap();
        assert_eq!(touched, 1);
    }
}
