//! Registry metrics

use prometheus::{IntCounter, IntGauge, Registry};

/// Metrics for registry activity and the notification fabric.
pub struct RegistryMetrics {
    /// Registrations accepted.
    pub registrations_total: IntCounter,

    /// Delta updates accepted.
    pub updates_total: IntCounter,

    /// Copies removed by explicit unregister.
    pub unregisters_total: IntCounter,

    /// Copies removed through the eviction controller.
    pub evictions_total: IntCounter,

    /// Holders currently in the registry.
    pub instances: IntGauge,

    /// Active subscriptions.
    pub subscribers: IntGauge,

    /// Eviction records waiting for quota.
    pub eviction_queue_depth: IntGauge,

    /// Notifications buffered across subscriber taps.
    pub buffered_notifications: IntGauge,
}

impl RegistryMetrics {
    /// Create and register registry metrics.
    pub fn new(registry: &Registry) -> Self {
        let registrations_total =
            IntCounter::new("registry_registrations_total", "Registrations accepted")
                .expect("Failed to create registrations_total metric");
        registry
            .register(Box::new(registrations_total.clone()))
            .expect("Failed to register registrations_total");

        let updates_total = IntCounter::new("registry_updates_total", "Delta updates accepted")
            .expect("Failed to create updates_total metric");
        registry
            .register(Box::new(updates_total.clone()))
            .expect("Failed to register updates_total");

        let unregisters_total = IntCounter::new(
            "registry_unregisters_total",
            "Copies removed by explicit unregister",
        )
        .expect("Failed to create unregisters_total metric");
        registry
            .register(Box::new(unregisters_total.clone()))
            .expect("Failed to register unregisters_total");

        let evictions_total = IntCounter::new(
            "registry_evictions_total",
            "Copies removed through the eviction controller",
        )
        .expect("Failed to create evictions_total metric");
        registry
            .register(Box::new(evictions_total.clone()))
            .expect("Failed to register evictions_total");

        let instances = IntGauge::new("registry_instances", "Holders currently in the registry")
            .expect("Failed to create instances metric");
        registry
            .register(Box::new(instances.clone()))
            .expect("Failed to register instances");

        let subscribers = IntGauge::new("registry_subscribers", "Active subscriptions")
            .expect("Failed to create subscribers metric");
        registry
            .register(Box::new(subscribers.clone()))
            .expect("Failed to register subscribers");

        let eviction_queue_depth = IntGauge::new(
            "registry_eviction_queue_depth",
            "Eviction records waiting for quota",
        )
        .expect("Failed to create eviction_queue_depth metric");
        registry
            .register(Box::new(eviction_queue_depth.clone()))
            .expect("Failed to register eviction_queue_depth");

        let buffered_notifications = IntGauge::new(
            "registry_buffered_notifications",
            "Notifications buffered across subscriber taps",
        )
        .expect("Failed to create buffered_notifications metric");
        registry
            .register(Box::new(buffered_notifications.clone()))
            .expect("Failed to register buffered_notifications");

        Self {
            registrations_total,
            updates_total,
            unregisters_total,
            evictions_total,
            instances,
            subscribers,
            eviction_queue_depth,
            buffered_notifications,
        }
    }

    pub fn record_registration(&self) {
        self.registrations_total.inc();
    }

    pub fn record_update(&self) {
        self.updates_total.inc();
    }

    pub fn record_unregister(&self) {
        self.unregisters_total.inc();
    }

    pub fn record_eviction(&self) {
        self.evictions_total.inc();
    }

    pub fn set_instances(&self, count: i64) {
        self.instances.set(count);
    }

    pub fn set_subscribers(&self, count: i64) {
        self.subscribers.set(count);
    }

    pub fn set_eviction_queue_depth(&self, depth: i64) {
        self.eviction_queue_depth.set(depth);
    }

    pub fn set_buffered_notifications(&self, depth: i64) {
        self.buffered_notifications.set(depth);
    }
}
