//! The broker's dispatch loop.
//!
//! A [`Dispatcher`] polls its host with a bounded wait, drains the batch
//! of available events, and turns each one into lifecycle or registry
//! operations. A [`StopHandle`] requests a cooperative stop that takes
//! effect once the current batch is finished.

use crate::lifecycle::ConnectionManager;
use crate::registry::TopicRegistry;
use crate::telemetry;
use beacon_protocol::{codec, Command};
use beacon_transport::{ChannelId, Host, HostEvent, PeerId, TransportError, DEFAULT_CHANNEL};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Shortest wait one poll will make, whatever the configuration says.
pub const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Dispatch loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Longest time one poll waits for the first event of a batch.
    pub poll_timeout_ms: u64,
}

impl DispatchConfig {
    /// The poll wait as a duration, never below [`MIN_POLL_TIMEOUT`].
    ///
    /// A zero wait would never hand control back to the runtime.
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms).max(MIN_POLL_TIMEOUT)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
        }
    }
}

/// Dispatch loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Stopped,
    Running,
}

#[derive(Debug, Default)]
struct LoopFlags {
    running: AtomicBool,
    stop_requested: AtomicBool,
}

/// Requests a dispatch loop to stop.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flags: Arc<LoopFlags>,
}

impl StopHandle {
    /// Ask the loop to stop after its current batch.
    ///
    /// A request made before [`Dispatcher::run`] starts is kept, and that
    /// run returns without polling.
    pub fn stop(&self) {
        if !self.flags.stop_requested.swap(true, Ordering::SeqCst) {
            info!("Dispatch loop stop requested");
        }
    }

    /// Check if the loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.flags.running.load(Ordering::SeqCst)
    }
}

/// Counters kept by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events taken from the host.
    pub events: u64,
    /// Commands decoded and applied.
    pub commands: u64,
    /// Messages dropped because they failed to decode.
    pub parse_failures: u64,
    /// Packets dropped for arriving on an unused channel or from a peer
    /// that is not live.
    pub dropped_packets: u64,
    /// Sends attempted by publish fan-out.
    pub fanout_sends: u64,
}

/// The dispatch loop.
pub struct Dispatcher<H: Host> {
    host: H,
    connections: ConnectionManager,
    config: DispatchConfig,
    flags: Arc<LoopFlags>,
    stats: DispatchStats,
}

impl<H: Host> Dispatcher<H> {
    /// Create a dispatcher over a host with default configuration.
    #[must_use]
    pub fn new(host: H, registry: Arc<TopicRegistry>) -> Self {
        Self::with_config(host, registry, DispatchConfig::default())
    }

    /// Create a dispatcher with custom configuration.
    #[must_use]
    pub fn with_config(host: H, registry: Arc<TopicRegistry>, config: DispatchConfig) -> Self {
        Self {
            host,
            connections: ConnectionManager::new(registry),
            config,
            flags: Arc::new(LoopFlags::default()),
            stats: DispatchStats::default(),
        }
    }

    /// Get a handle that can stop the loop from another task or thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flags: Arc::clone(&self.flags),
        }
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> DispatchState {
        if self.flags.running.load(Ordering::SeqCst) {
            DispatchState::Running
        } else {
            DispatchState::Stopped
        }
    }

    /// The shared topic registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TopicRegistry> {
        self.connections.registry()
    }

    /// The connection lifecycle manager.
    #[must_use]
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// The underlying host.
    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Dispatcher counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Run until stopped.
    ///
    /// Each iteration checks for a stop request, then processes one full
    /// batch. The request is consumed when the loop exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the host fails while being polled.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        self.flags.running.store(true, Ordering::SeqCst);
        info!(
            transport = self.host.name(),
            poll_timeout = ?self.config.poll_timeout(),
            "Dispatch loop started"
        );

        let result = loop {
            if self.flags.stop_requested.swap(false, Ordering::SeqCst) {
                break Ok(());
            }
            if let Err(e) = self.step().await {
                error!(error = %e, "Host failed, stopping dispatch loop");
                break Err(e);
            }
        };

        self.flags.running.store(false, Ordering::SeqCst);
        info!(
            events = self.stats.events,
            commands = self.stats.commands,
            "Dispatch loop stopped"
        );
        result
    }

    /// Process one poll batch.
    ///
    /// Waits up to the poll timeout for a first event, then handles every
    /// event that is already available. Returns the number handled.
    ///
    /// # Errors
    ///
    /// Returns an error if the host fails while being polled.
    pub async fn step(&mut self) -> Result<usize, TransportError> {
        let mut handled = 0;
        let mut wait = self.config.poll_timeout();

        while let Some(event) = self.host.service(wait).await? {
            self.handle_event(event);
            handled += 1;
            wait = Duration::ZERO;
        }

        if handled > 0 {
            trace!(events = handled, "Batch processed");
        }
        Ok(handled)
    }

    /// Apply a single host event.
    pub fn handle_event(&mut self, event: HostEvent) {
        self.stats.events += 1;

        match event {
            HostEvent::Connect { peer, addr } => self.connections.on_connect(peer, addr),
            HostEvent::Receive {
                peer,
                channel,
                packet,
            } => self.handle_packet(peer, channel, packet),
            HostEvent::Disconnect { peer } => {
                self.connections.on_disconnect(peer);
            }
        }
    }

    fn handle_packet(&mut self, peer: PeerId, channel: ChannelId, packet: Bytes) {
        if channel != DEFAULT_CHANNEL {
            trace!(peer = %peer, channel, "Dropping packet on unused channel");
            self.stats.dropped_packets += 1;
            telemetry::record_dropped_packet("channel");
            return;
        }

        // A peer that is not live must never be added to a topic.
        if !self.connections.is_connected(peer) {
            debug!(peer = %peer, "Dropping packet from peer that is not connected");
            self.stats.dropped_packets += 1;
            telemetry::record_dropped_packet("stale_peer");
            return;
        }

        let command = match codec::decode(packet) {
            Ok(command) => command,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Dropping malformed message");
                self.stats.parse_failures += 1;
                telemetry::record_parse_failure();
                return;
            }
        };

        self.stats.commands += 1;
        telemetry::record_command(command.kind());

        match command {
            Command::Publish { topic, payload } => {
                let recipients = self
                    .connections
                    .registry()
                    .publish(&topic, &payload, &self.host);
                self.stats.fanout_sends += recipients as u64;
                if recipients > 0 {
                    self.host.flush();
                }
                debug!(peer = %peer, topic = %topic, recipients, "Published");
            }
            Command::Subscribe { topic } => {
                self.connections.registry().subscribe(peer, &topic);
            }
            Command::Unsubscribe { topic } => {
                self.connections.registry().unsubscribe(peer, &topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::TopicName;
    use async_trait::async_trait;
    use beacon_transport::{MemoryClient, MemoryHost, PeerSender};
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;

    fn dispatcher() -> Dispatcher<MemoryHost> {
        Dispatcher::with_config(
            MemoryHost::new(),
            Arc::new(TopicRegistry::new()),
            DispatchConfig { poll_timeout_ms: 10 },
        )
    }

    fn connect(dispatcher: &Dispatcher<MemoryHost>) -> MemoryClient {
        dispatcher.host().connector().connect().unwrap()
    }

    fn news() -> TopicName {
        TopicName::from("news")
    }

    #[tokio::test]
    async fn test_subscribe_publish_unsubscribe() {
        let mut dispatcher = dispatcher();
        let mut a = connect(&dispatcher);
        let publisher = connect(&dispatcher);

        a.send(&b"SUB:news:"[..]).unwrap();
        publisher.send(&b"PUB:news:hello"[..]).unwrap();
        dispatcher.step().await.unwrap();

        assert_eq!(a.drain(), vec![Bytes::from_static(b"PUB:news:hello")]);

        a.send(&b"UNSUB:news:"[..]).unwrap();
        publisher.send(&b"PUB:news:again"[..]).unwrap();
        dispatcher.step().await.unwrap();

        assert!(a.drain().is_empty());
        assert_eq!(dispatcher.stats().fanout_sends, 1);
    }

    #[tokio::test]
    async fn test_disconnected_peer_receives_nothing() {
        let mut dispatcher = dispatcher();
        let mut b = connect(&dispatcher);
        let mut c = connect(&dispatcher);
        let publisher = connect(&dispatcher);
        let b_id = b.id();

        b.send(&b"SUB:news:"[..]).unwrap();
        c.send(&b"SUB:news:"[..]).unwrap();
        dispatcher.step().await.unwrap();
        assert_eq!(dispatcher.registry().subscriber_count(&news()), 2);

        b.disconnect();
        publisher.send(&b"PUB:news:only-c"[..]).unwrap();
        dispatcher.step().await.unwrap();

        assert!(b.drain().is_empty());
        assert_eq!(c.drain(), vec![Bytes::from_static(b"PUB:news:only-c")]);
        assert!(!dispatcher.connections().is_connected(b_id));
        assert!(dispatcher.registry().topics_for(b_id).is_empty());
    }

    #[tokio::test]
    async fn test_payload_with_colons_is_preserved() {
        let mut dispatcher = dispatcher();
        let mut sub = connect(&dispatcher);

        sub.send(&b"SUB:metrics:"[..]).unwrap();
        sub.send(&b"PUB:metrics:12:34:56"[..]).unwrap();
        dispatcher.step().await.unwrap();

        let packet = sub.try_recv().unwrap();
        assert_eq!(
            codec::decode(packet).unwrap(),
            Command::publish("metrics", &b"12:34:56"[..])
        );
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let mut dispatcher = dispatcher();
        let mut client = connect(&dispatcher);

        client.send(&b"SUB:news:"[..]).unwrap();
        dispatcher.step().await.unwrap();
        let before = dispatcher.registry().stats();

        client.send(&b"garbage"[..]).unwrap();
        client.send(&b"PUB:onlyonecolon"[..]).unwrap();
        client.send(&b"JOIN:news:"[..]).unwrap();
        dispatcher.step().await.unwrap();

        assert_eq!(dispatcher.registry().stats(), before);
        assert_eq!(dispatcher.stats().parse_failures, 3);
        assert!(client.drain().is_empty());

        // The loop keeps serving the peer afterwards
        client.send(&b"PUB:news:still-here"[..]).unwrap();
        dispatcher.step().await.unwrap();
        assert_eq!(client.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_to_unknown_topic() {
        let mut dispatcher = dispatcher();
        let client = connect(&dispatcher);

        client.send(&b"PUB:nope:payload"[..]).unwrap();
        dispatcher.step().await.unwrap();

        assert_eq!(dispatcher.stats().fanout_sends, 0);
        assert!(!dispatcher.registry().topic_exists(&TopicName::from("nope")));
    }

    #[tokio::test]
    async fn test_packets_on_other_channels_are_dropped() {
        let mut dispatcher = dispatcher();
        let client = connect(&dispatcher);

        client.send_on(1, &b"SUB:news:"[..]).unwrap();
        dispatcher.step().await.unwrap();

        assert_eq!(dispatcher.stats().dropped_packets, 1);
        assert!(!dispatcher.registry().topic_exists(&news()));
    }

    #[test]
    fn test_packets_from_stale_peers_are_dropped() {
        let mut dispatcher = dispatcher();
        let ghost = PeerId::new(u64::MAX);

        dispatcher.handle_event(HostEvent::Receive {
            peer: ghost,
            channel: DEFAULT_CHANNEL,
            packet: Bytes::from_static(b"SUB:news:"),
        });

        assert!(!dispatcher.registry().is_subscribed(ghost, &news()));
        assert_eq!(dispatcher.stats().dropped_packets, 1);
    }

    #[tokio::test]
    async fn test_failed_send_does_not_block_other_subscribers() {
        let mut dispatcher = dispatcher();
        let mut stale = connect(&dispatcher);
        let mut healthy = connect(&dispatcher);

        stale.send(&b"SUB:news:"[..]).unwrap();
        healthy.send(&b"SUB:news:"[..]).unwrap();
        dispatcher.step().await.unwrap();

        stale.close_inbox();
        healthy.send(&b"PUB:news:x"[..]).unwrap();
        dispatcher.step().await.unwrap();

        assert_eq!(healthy.drain().len(), 1);
        assert_eq!(dispatcher.stats().fanout_sends, 2);
        assert!(dispatcher.registry().is_subscribed(stale.id(), &news()));
    }

    #[tokio::test]
    async fn test_step_times_out_when_idle() {
        let mut dispatcher = dispatcher();
        assert_eq!(dispatcher.step().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let mut dispatcher = dispatcher();
        let mut client = connect(&dispatcher);
        let stop = dispatcher.stop_handle();
        assert_eq!(dispatcher.state(), DispatchState::Stopped);

        let task = tokio::spawn(async move {
            let result = dispatcher.run().await;
            (dispatcher, result)
        });

        client.send(&b"SUB:news:"[..]).unwrap();
        client.send(&b"PUB:news:live"[..]).unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(5), client.recv())
            .await
            .unwrap();
        assert_eq!(delivered, Some(Bytes::from_static(b"PUB:news:live")));
        assert!(stop.is_running());

        stop.stop();
        let (dispatcher, result) = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(dispatcher.state(), DispatchState::Stopped);
        assert!(!stop.is_running());
    }

    #[test]
    fn test_poll_timeout_has_a_floor() {
        let config = DispatchConfig { poll_timeout_ms: 0 };
        assert_eq!(config.poll_timeout(), MIN_POLL_TIMEOUT);
        assert_eq!(
            DispatchConfig::default().poll_timeout(),
            Duration::from_millis(100)
        );
    }

    #[tokio::test]
    async fn test_zero_poll_timeout_still_yields() {
        let mut dispatcher = Dispatcher::with_config(
            MemoryHost::new(),
            Arc::new(TopicRegistry::new()),
            DispatchConfig { poll_timeout_ms: 0 },
        );
        let stop = dispatcher.stop_handle();
        let ran = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ran);

        // Only runs if the loop hands control back to this runtime.
        tokio::spawn(async move {
            seen.fetch_add(1, Ordering::SeqCst);
            stop.stop();
        });

        tokio::time::timeout(Duration::from_secs(5), dispatcher.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_before_run_is_kept() {
        let mut dispatcher = dispatcher();
        let client = connect(&dispatcher);
        dispatcher.stop_handle().stop();

        client.send(&b"SUB:news:"[..]).unwrap();
        tokio::time::timeout(Duration::from_secs(5), dispatcher.run())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(dispatcher.stats().events, 0);
        assert_eq!(dispatcher.state(), DispatchState::Stopped);

        // The request was consumed; the queued events are still there.
        assert_eq!(dispatcher.step().await.unwrap(), 2);
        assert!(dispatcher.registry().is_subscribed(client.id(), &news()));
    }

    /// Host that asks the loop to stop as soon as it hands out an event.
    struct StopOnFirstEvent {
        inner: MemoryHost,
        stop: Arc<OnceLock<StopHandle>>,
    }

    impl PeerSender for StopOnFirstEvent {
        fn send(
            &self,
            peer: PeerId,
            channel: ChannelId,
            packet: Bytes,
        ) -> Result<(), TransportError> {
            self.inner.send(peer, channel, packet)
        }
    }

    #[async_trait]
    impl Host for StopOnFirstEvent {
        async fn service(
            &mut self,
            timeout: Duration,
        ) -> Result<Option<HostEvent>, TransportError> {
            let event = self.inner.service(timeout).await?;
            if event.is_some() {
                if let Some(stop) = self.stop.get() {
                    stop.stop();
                }
            }
            Ok(event)
        }

        fn peer_count(&self) -> usize {
            self.inner.peer_count()
        }

        fn name(&self) -> &'static str {
            "stop-on-first-event"
        }
    }

    #[tokio::test]
    async fn test_stop_finishes_current_batch() {
        let inner = MemoryHost::new();
        let connector = inner.connector();
        let slot = Arc::new(OnceLock::new());
        let host = StopOnFirstEvent {
            inner,
            stop: Arc::clone(&slot),
        };
        let mut dispatcher = Dispatcher::with_config(
            host,
            Arc::new(TopicRegistry::new()),
            DispatchConfig { poll_timeout_ms: 10 },
        );
        slot.set(dispatcher.stop_handle()).unwrap();

        let mut client = connector.connect().unwrap();
        client.send(&b"SUB:news:"[..]).unwrap();
        client.send(&b"PUB:news:first"[..]).unwrap();
        client.send(&b"PUB:news:second"[..]).unwrap();

        tokio::time::timeout(Duration::from_secs(5), dispatcher.run())
            .await
            .unwrap()
            .unwrap();

        // Connect plus three commands, all from the batch that saw the stop.
        assert_eq!(dispatcher.stats().events, 4);
        assert_eq!(dispatcher.stats().commands, 3);
        assert!(dispatcher.registry().is_subscribed(client.id(), &news()));
        assert_eq!(
            client.drain(),
            vec![
                Bytes::from_static(b"PUB:news:first"),
                Bytes::from_static(b"PUB:news:second"),
            ]
        );
        assert_eq!(dispatcher.state(), DispatchState::Stopped);
    }

    #[test]
    fn test_repeated_disconnect_event_is_harmless() {
        let mut dispatcher = dispatcher();
        let peer = PeerId::new(u64::MAX - 1);

        dispatcher.handle_event(HostEvent::Connect { peer, addr: None });
        dispatcher.handle_event(HostEvent::Receive {
            peer,
            channel: DEFAULT_CHANNEL,
            packet: Bytes::from_static(b"SUB:news:"),
        });
        assert!(dispatcher.registry().is_subscribed(peer, &news()));

        dispatcher.handle_event(HostEvent::Disconnect { peer });
        dispatcher.handle_event(HostEvent::Disconnect { peer });

        assert!(!dispatcher.connections().is_connected(peer));
        assert!(dispatcher.registry().topics_for(peer).is_empty());
        assert_eq!(dispatcher.registry().stats().total_subscriptions, 0);
        assert_eq!(dispatcher.connections().peer_count(), 0);
        assert_eq!(dispatcher.stats().events, 4);
    }
}
