//! Outbound replication channel.
//!
//! Mirrors every LOCAL-origin change of the local registry to one peer over
//! a single connection, keeps the connection alive with heartbeats, and
//! reports its own lifecycle. Any transport failure closes the channel;
//! recovery is a new channel, never a reconnect.

use std::sync::{Arc, RwLock};

use roster_registry::{InterestSubscription, Lifecycle, LifecycleState, SourcedRegistry};
use roster_types::{ChangeNotification, Interest, Origin, SourceFilter};
use tokio::sync::{watch, OnceCell};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::protocol::ReplicationMessage;
use crate::transport::{ReplicationConnection, TransportClient};

/// Channel state machine. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection attempted yet.
    Idle,

    /// The single connection is established and memoized.
    Connected,

    /// The channel is done; all further sends fail.
    Closed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Idle => write!(f, "idle"),
            ChannelState::Connected => write!(f, "connected"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// Client side of a replication link.
///
/// Created with [`ReplicationChannel::start`], which subscribes to the
/// local registry's full-interest stream restricted to LOCAL-origin
/// mutations and forwards each notification as the corresponding wire
/// message.
pub struct ReplicationChannel {
    client: Arc<dyn TransportClient>,
    config: ReplicationConfig,
    state: RwLock<ChannelState>,
    connection: OnceCell<Arc<dyn ReplicationConnection>>,
    lifecycle: Lifecycle,
}

impl ReplicationChannel {
    /// Start replicating `registry` to the peer behind `client`.
    pub async fn start(
        registry: &Arc<SourcedRegistry>,
        client: Arc<dyn TransportClient>,
        config: ReplicationConfig,
    ) -> Result<Arc<Self>> {
        let subscription = registry
            .for_interest_from(Interest::Full, SourceFilter::Origin(Origin::Local))
            .await?;

        let channel = Arc::new(Self {
            client,
            config,
            state: RwLock::new(ChannelState::Idle),
            connection: OnceCell::new(),
            lifecycle: Lifecycle::new(),
        });

        // Both workers exit on their own once the lifecycle turns terminal.
        tokio::spawn(Arc::clone(&channel).replicate(subscription));
        tokio::spawn(Arc::clone(&channel).heartbeat());

        Ok(channel)
    }

    pub fn state(&self) -> ChannelState {
        *self.state.read().unwrap()
    }

    /// Lifecycle stream: completes on explicit close, errors on transport
    /// or registry failure.
    pub fn lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Close the channel. Idempotent; completes the lifecycle normally.
    pub async fn close(&self) {
        if !self.enter_closed() {
            return;
        }
        info!("replication channel closed");
        if let Some(connection) = self.connection.get() {
            connection.close().await;
        }
        self.lifecycle.complete();
    }

    async fn close_with(&self, error: ReplicationError) {
        if !self.enter_closed() {
            return;
        }
        warn!(error = %error, "replication channel failed");
        if let Some(connection) = self.connection.get() {
            connection.close().await;
        }
        self.lifecycle.fail(error.to_string());
    }

    /// Move to `Closed`; returns false when already there.
    fn enter_closed(&self) -> bool {
        let mut state = self.state.write().unwrap();
        if *state == ChannelState::Closed {
            return false;
        }
        debug!(from = %*state, "replication channel closing");
        *state = ChannelState::Closed;
        true
    }

    /// The channel's one connection, established lazily on first use and
    /// shared by every later caller.
    async fn connect(&self) -> Result<Arc<dyn ReplicationConnection>> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let connection = self.client.connect().await?;
                let mut state = self.state.write().unwrap();
                if *state == ChannelState::Idle {
                    *state = ChannelState::Connected;
                }
                info!("replication connection established");
                Ok::<_, ReplicationError>(connection)
            })
            .await?;
        Ok(Arc::clone(connection))
    }

    async fn send_message(&self, message: ReplicationMessage) -> Result<()> {
        if self.state() == ChannelState::Closed {
            return Err(ReplicationError::ChannelClosed);
        }
        let connection = self.connect().await?;
        match tokio::time::timeout(self.config.send_timeout, connection.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(ReplicationError::Transport(format!(
                "send stalled past {:?}",
                self.config.send_timeout
            ))),
        }
    }

    /// Forward the registry's LOCAL-origin stream to the peer.
    async fn replicate(self: Arc<Self>, mut subscription: InterestSubscription) {
        let mut lifecycle = self.lifecycle.subscribe();
        loop {
            tokio::select! {
                changed = lifecycle.changed() => {
                    if changed.is_err() || lifecycle.borrow().is_terminal() {
                        return;
                    }
                }
                notification = subscription.next() => {
                    match notification {
                        Some(notification) => {
                            let Some(message) = outbound_message(notification) else {
                                continue;
                            };
                            debug!(kind = message.kind(), "replicating change");
                            if let Err(error) = self.send_message(message).await {
                                self.close_with(error).await;
                                return;
                            }
                        }
                        None => {
                            // The registry ended the stream: failed shutdown
                            // or slow-consumer termination both end the
                            // channel abnormally.
                            match subscription.error() {
                                Some(error) => {
                                    self.close_with(ReplicationError::Registry(error)).await
                                }
                                None => self.close().await,
                            }
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Fire-and-forget liveness probe on a fixed period. Only an
    /// established connection is probed; a failing or stalled probe closes
    /// the channel.
    async fn heartbeat(self: Arc<Self>) {
        let mut lifecycle = self.lifecycle.subscribe();
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = lifecycle.changed() => {
                    if changed.is_err() || lifecycle.borrow().is_terminal() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let Some(connection) = self.connection.get() else {
                        continue;
                    };
                    let probe = tokio::time::timeout(
                        self.config.send_timeout,
                        connection.send_heartbeat(),
                    )
                    .await;
                    match probe {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => {
                            self.close_with(error).await;
                            return;
                        }
                        Err(_) => {
                            self.close_with(ReplicationError::Transport(
                                "heartbeat stalled".to_string(),
                            ))
                            .await;
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Map a registry notification to its wire message. The sentinel and
/// anything else without a wire form map to `None`.
fn outbound_message(notification: ChangeNotification) -> Option<ReplicationMessage> {
    match notification {
        ChangeNotification::Add(info) => Some(ReplicationMessage::Register(info)),
        ChangeNotification::Modify { info, .. } => Some(ReplicationMessage::Update(info)),
        ChangeNotification::Delete(info) => {
            Some(ReplicationMessage::Unregister(info.id().to_string()))
        }
        ChangeNotification::BufferSentinel => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use roster_registry::RegistryConfig;
    use roster_types::{Delta, InstanceInfo, Source};
    use tokio::sync::mpsc;

    struct MockConnection {
        sent: Mutex<Vec<ReplicationMessage>>,
        heartbeats: AtomicUsize,
        fail_sends: AtomicBool,
        fail_heartbeats: AtomicBool,
        closed: AtomicBool,
    }

    impl MockConnection {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                heartbeats: AtomicUsize::new(0),
                fail_sends: AtomicBool::new(false),
                fail_heartbeats: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            })
        }

        fn sent(&self) -> Vec<ReplicationMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReplicationConnection for MockConnection {
        async fn send(&self, message: ReplicationMessage) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(ReplicationError::Transport("wire broke".to_string()));
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn send_heartbeat(&self) -> Result<()> {
            if self.fail_heartbeats.load(Ordering::SeqCst) {
                return Err(ReplicationError::Transport("peer gone".to_string()));
            }
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct MockClient {
        connection: Arc<MockConnection>,
        connects: AtomicUsize,
    }

    impl MockClient {
        fn new(connection: Arc<MockConnection>) -> Arc<Self> {
            Arc::new(Self {
                connection,
                connects: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TransportClient for MockClient {
        async fn connect(&self) -> Result<Arc<dyn ReplicationConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.connection.clone() as Arc<dyn ReplicationConnection>)
        }
    }

    fn test_registry() -> Arc<SourcedRegistry> {
        // Eviction is unused here; a drained quota stream just parks it.
        let (_tx, rx) = mpsc::channel::<u32>(8);
        SourcedRegistry::new(RegistryConfig::default(), rx, &prometheus::Registry::new())
    }

    fn test_config() -> ReplicationConfig {
        ReplicationConfig {
            heartbeat_interval: Duration::from_millis(20),
            send_timeout: Duration::from_millis(500),
        }
    }

    fn info(id: &str, version: u64, zone: &str) -> InstanceInfo {
        InstanceInfo::builder(id)
            .version(version)
            .app("search")
            .zone(zone)
            .build()
    }

    async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn forwards_local_changes_as_wire_messages() {
        let connection = MockConnection::new();
        let registry = test_registry();
        let channel = ReplicationChannel::start(
            &registry,
            MockClient::new(connection.clone()),
            test_config(),
        )
        .await
        .unwrap();

        let source = Source::local("srv");
        registry
            .register(info("a", 1, "us-east"), source.clone())
            .await
            .unwrap();
        registry
            .update(
                info("a", 2, "us-west"),
                vec![Delta::set("a", 2, "zone", "us-west")],
                source.clone(),
            )
            .await
            .unwrap();
        registry
            .unregister(&info("a", 2, "us-west"), &source)
            .await
            .unwrap();

        wait_until("three wire messages", || connection.sent().len() == 3).await;
        let sent = connection.sent();
        assert_eq!(sent[0], ReplicationMessage::Register(info("a", 1, "us-east")));
        assert_eq!(sent[1], ReplicationMessage::Update(info("a", 2, "us-west")));
        assert_eq!(sent[2], ReplicationMessage::Unregister("a".to_string()));
        assert_eq!(channel.state(), ChannelState::Connected);
    }

    #[tokio::test]
    async fn existing_local_instances_replicate_on_start() {
        let connection = MockConnection::new();
        let registry = test_registry();
        registry
            .register(info("a", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();

        let _channel = ReplicationChannel::start(
            &registry,
            MockClient::new(connection.clone()),
            test_config(),
        )
        .await
        .unwrap();

        wait_until("snapshot replication", || !connection.sent().is_empty()).await;
        assert_eq!(
            connection.sent()[0],
            ReplicationMessage::Register(info("a", 1, "us-east"))
        );
    }

    #[tokio::test]
    async fn replicated_changes_are_not_echoed_back() {
        let connection = MockConnection::new();
        let registry = test_registry();
        let _channel = ReplicationChannel::start(
            &registry,
            MockClient::new(connection.clone()),
            test_config(),
        )
        .await
        .unwrap();

        registry
            .register(info("remote", 1, "eu-1"), Source::replicated("peer"))
            .await
            .unwrap();
        registry
            .register(info("local", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();

        wait_until("the local change", || !connection.sent().is_empty()).await;
        let sent = connection.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            ReplicationMessage::Register(info("local", 1, "us-east"))
        );
    }

    #[tokio::test]
    async fn connection_is_established_exactly_once() {
        let connection = MockConnection::new();
        let client = MockClient::new(connection.clone());
        let registry = test_registry();
        let _channel = ReplicationChannel::start(&registry, client.clone(), test_config())
            .await
            .unwrap();

        for n in 0..5 {
            registry
                .register(info(&format!("i-{n}"), 1, "us-east"), Source::local("srv"))
                .await
                .unwrap();
        }

        wait_until("five wire messages", || connection.sent().len() == 5).await;
        assert_eq!(client.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_failure_closes_the_channel() {
        let connection = MockConnection::new();
        let registry = test_registry();
        let channel = ReplicationChannel::start(
            &registry,
            MockClient::new(connection.clone()),
            test_config(),
        )
        .await
        .unwrap();
        let mut lifecycle = channel.lifecycle();

        registry
            .register(info("a", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();
        wait_until("the first message", || connection.sent().len() == 1).await;

        connection.fail_sends.store(true, Ordering::SeqCst);
        registry
            .register(info("b", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();

        wait_until("the channel to close", || {
            channel.state() == ChannelState::Closed
        })
        .await;
        assert!(matches!(
            &*lifecycle.borrow_and_update(),
            LifecycleState::Failed(reason) if reason.contains("transport failure")
        ));
        assert!(connection.closed.load(Ordering::SeqCst));

        // The registry keeps working, but nothing more reaches the wire.
        registry
            .register(info("c", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connection.sent().len(), 1);
    }

    #[tokio::test]
    async fn heartbeats_flow_once_connected() {
        let connection = MockConnection::new();
        let registry = test_registry();
        let _channel = ReplicationChannel::start(
            &registry,
            MockClient::new(connection.clone()),
            test_config(),
        )
        .await
        .unwrap();

        // No connection yet, so no probes.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(connection.heartbeats.load(Ordering::SeqCst), 0);

        registry
            .register(info("a", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();
        wait_until("heartbeats", || {
            connection.heartbeats.load(Ordering::SeqCst) >= 2
        })
        .await;
    }

    #[tokio::test]
    async fn heartbeat_failure_closes_the_channel() {
        let connection = MockConnection::new();
        connection.fail_heartbeats.store(true, Ordering::SeqCst);
        let registry = test_registry();
        let channel = ReplicationChannel::start(
            &registry,
            MockClient::new(connection.clone()),
            test_config(),
        )
        .await
        .unwrap();

        registry
            .register(info("a", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();

        wait_until("the channel to close", || {
            channel.state() == ChannelState::Closed
        })
        .await;
        assert!(matches!(
            channel.lifecycle().borrow().clone(),
            LifecycleState::Failed(_)
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_completes_the_lifecycle() {
        let connection = MockConnection::new();
        let registry = test_registry();
        let channel = ReplicationChannel::start(
            &registry,
            MockClient::new(connection.clone()),
            test_config(),
        )
        .await
        .unwrap();

        registry
            .register(info("a", 1, "us-east"), Source::local("srv"))
            .await
            .unwrap();
        wait_until("the connection", || channel.state() == ChannelState::Connected).await;

        channel.close().await;
        channel.close().await;

        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.lifecycle().borrow().clone(), LifecycleState::Completed);
        assert!(connection.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn registry_shutdown_fails_the_channel() {
        let connection = MockConnection::new();
        let registry = test_registry();
        let channel = ReplicationChannel::start(
            &registry,
            MockClient::new(connection.clone()),
            test_config(),
        )
        .await
        .unwrap();

        registry.shutdown().await;

        wait_until("the channel to close", || {
            channel.state() == ChannelState::Closed
        })
        .await;
        assert!(matches!(
            channel.lifecycle().borrow().clone(),
            LifecycleState::Failed(_)
        ));
    }
}
