//! In-process transport.
//!
//! [`MemoryHost`] has the same event semantics as the network hosts but
//! delivers packets over in-memory queues. It backs the broker's tests and
//! benchmarks.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, trace};

use crate::traits::{
    check_channel, ChannelId, Host, HostConfig, HostEvent, PeerId, PeerSender, TransportError,
    DEFAULT_CHANNEL,
};

type Inbox = mpsc::UnboundedSender<(ChannelId, Bytes)>;

struct Shared {
    peers: DashMap<PeerId, Inbox>,
    events: mpsc::UnboundedSender<HostEvent>,
    max_peers: usize,
    channel_count: usize,
}

/// In-memory host.
pub struct MemoryHost {
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<HostEvent>,
}

impl MemoryHost {
    /// Create a host with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&HostConfig::default())
    }

    /// Create a host using the peer and channel limits from `config`.
    #[must_use]
    pub fn with_config(config: &HostConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                peers: DashMap::new(),
                events: tx,
                max_peers: config.max_peers,
                channel_count: config.channel_count,
            }),
            events: rx,
        }
    }

    /// Get a handle that clients use to connect to this host.
    #[must_use]
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSender for MemoryHost {
    fn send(&self, peer: PeerId, channel: ChannelId, packet: Bytes) -> Result<(), TransportError> {
        check_channel(channel, self.shared.channel_count)?;
        let inbox = self
            .shared
            .peers
            .get(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        inbox
            .send((channel, packet))
            .map_err(|_| TransportError::ConnectionClosed(peer))
    }
}

#[async_trait]
impl Host for MemoryHost {
    async fn service(&mut self, timeout: Duration) -> Result<Option<HostEvent>, TransportError> {
        if timeout.is_zero() {
            return match self.events.try_recv() {
                Ok(event) => Ok(Some(event)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
            };
        }

        match tokio::time::timeout(timeout, self.events.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Ok(None),
        }
    }

    fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Connects new clients to a [`MemoryHost`].
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Connect a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is at its peer limit.
    pub fn connect(&self) -> Result<MemoryClient, TransportError> {
        if self.shared.peers.len() >= self.shared.max_peers {
            return Err(TransportError::PeerLimitReached(self.shared.max_peers));
        }

        let peer = PeerId::allocate();
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.peers.insert(peer, tx);
        self.shared
            .events
            .send(HostEvent::Connect { peer, addr: None })
            .map_err(|_| TransportError::Closed)?;

        debug!(peer = %peer, "Memory client connected");

        Ok(MemoryClient {
            peer,
            shared: Arc::clone(&self.shared),
            inbox: rx,
            connected: true,
        })
    }
}

/// The client side of an in-memory connection.
///
/// Dropping the client disconnects it.
pub struct MemoryClient {
    peer: PeerId,
    shared: Arc<Shared>,
    inbox: mpsc::UnboundedReceiver<(ChannelId, Bytes)>,
    connected: bool,
}

impl MemoryClient {
    /// The handle the host knows this client by.
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.peer
    }

    /// Check if the client is still connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Send a packet on the default channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is disconnected.
    pub fn send(&self, packet: impl Into<Bytes>) -> Result<(), TransportError> {
        self.send_on(DEFAULT_CHANNEL, packet)
    }

    /// Send a packet on a specific channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is disconnected.
    pub fn send_on(
        &self,
        channel: ChannelId,
        packet: impl Into<Bytes>,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::ConnectionClosed(self.peer));
        }
        self.shared
            .events
            .send(HostEvent::Receive {
                peer: self.peer,
                channel,
                packet: packet.into(),
            })
            .map_err(|_| TransportError::Closed)
    }

    /// Take the next delivered packet without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.inbox.try_recv().ok().map(|(_, packet)| packet)
    }

    /// Wait for the next delivered packet.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbox.recv().await.map(|(_, packet)| packet)
    }

    /// Take every packet delivered so far.
    pub fn drain(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Stop accepting deliveries while staying connected.
    ///
    /// Subsequent host sends to this peer fail with
    /// [`TransportError::ConnectionClosed`], but no disconnect event is
    /// raised.
    pub fn close_inbox(&mut self) {
        self.inbox.close();
    }

    /// Disconnect from the host. Calling this more than once is a no-op.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.shared.peers.remove(&self.peer);
        // The host may already be gone.
        let _ = self
            .shared
            .events
            .send(HostEvent::Disconnect { peer: self.peer });
        trace!(peer = %self.peer, "Memory client disconnected");
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
