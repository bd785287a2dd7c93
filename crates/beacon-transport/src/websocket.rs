//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based host using tokio-tungstenite.
//! Each WebSocket message is one packet. WebSocket has a single ordered
//! stream per connection, so inbound packets are reported on
//! [`DEFAULT_CHANNEL`] and every outbound channel shares that stream.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::traits::{
    check_channel, ChannelId, Host, HostConfig, HostEvent, PeerId, PeerSender, TransportError,
    DEFAULT_CHANNEL,
};

struct PeerLink {
    outbound: mpsc::UnboundedSender<Bytes>,
    addr: SocketAddr,
}

struct Shared {
    peers: DashMap<PeerId, PeerLink>,
    /// Connections admitted, including those still handshaking.
    slots: AtomicUsize,
    config: HostConfig,
}

impl Shared {
    fn reserve_slot(&self) -> bool {
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.config.max_peers).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.slots.fetch_sub(1, Ordering::AcqRel);
    }
}

/// WebSocket host.
pub struct WebSocketHost {
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<HostEvent>,
    local_addr: SocketAddr,
    acceptor: JoinHandle<()>,
}

impl WebSocketHost {
    /// Bind a new WebSocket host and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(config: HostConfig) -> Result<Self, TransportError> {
        let addr = config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(
            "WebSocket host listening on {} (max peers: {}, channels: {})",
            local_addr, config.max_peers, config.channel_count
        );

        let shared = Arc::new(Shared {
            peers: DashMap::new(),
            slots: AtomicUsize::new(0),
            config,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let acceptor = tokio::spawn(accept_loop(listener, Arc::clone(&shared), tx));

        Ok(Self {
            shared,
            events: rx,
            local_addr,
            acceptor,
        })
    }

    /// Get the local address this host is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the remote address of a connected peer.
    #[must_use]
    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.shared.peers.get(&peer).map(|link| link.addr)
    }
}

impl Drop for WebSocketHost {
    fn drop(&mut self) {
        self.acceptor.abort();
        // Dropping the outbound senders ends every writer, which closes
        // its connection.
        self.shared.peers.clear();
    }
}

impl PeerSender for WebSocketHost {
    fn send(&self, peer: PeerId, channel: ChannelId, packet: Bytes) -> Result<(), TransportError> {
        check_channel(channel, self.shared.config.channel_count)?;
        let link = self
            .shared
            .peers
            .get(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        link.outbound
            .send(packet)
            .map_err(|_| TransportError::ConnectionClosed(peer))
    }
}

#[async_trait]
impl Host for WebSocketHost {
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
        "websocket"
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<HostEvent>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Failed to accept TCP connection");
                continue;
            }
        };

        if !shared.reserve_slot() {
            warn!(
                addr = %addr,
                max_peers = shared.config.max_peers,
                "Refusing connection: peer limit reached"
            );
            drop(stream);
            continue;
        }

        debug!("Accepted TCP connection from {}", addr);
        tokio::spawn(handle_connection(
            stream,
            addr,
            Arc::clone(&shared),
            events.clone(),
        ));
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<HostEvent>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(addr = %addr, error = %e, "WebSocket handshake failed");
            shared.release_slot();
            return;
        }
    };

    let peer = PeerId::allocate();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    shared.peers.insert(peer, PeerLink { outbound, addr });

    if events
        .send(HostEvent::Connect {
            peer,
            addr: Some(addr),
        })
        .is_err()
    {
        // Host dropped while we were handshaking.
        shared.peers.remove(&peer);
        shared.release_slot();
        return;
    }

    debug!(peer = %peer, addr = %addr, "WebSocket handshake completed");

    let (mut sink, mut source) = ws_stream.split();
    let max_message_size = shared.config.max_message_size;

    let writer = async move {
        while let Some(packet) = outbound_rx.recv().await {
            if let Err(e) = sink.send(Message::Binary(packet.to_vec())).await {
                debug!(peer = %peer, error = %e, "WebSocket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    };

    let reader = async {
        loop {
            let packet = match source.next().await {
                Some(Ok(Message::Binary(data))) => Bytes::from(data),
                // For compatibility, treat text as binary
                Some(Ok(Message::Text(text))) => Bytes::from(text),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    debug!(peer = %peer, "Received close frame");
                    break;
                }
                Some(Err(e)) => {
                    debug!(peer = %peer, error = %e, "WebSocket read failed");
                    break;
                }
                None => {
                    debug!(peer = %peer, "WebSocket stream ended");
                    break;
                }
            };

            if packet.len() > max_message_size {
                warn!(
                    peer = %peer,
                    size = packet.len(),
                    max = max_message_size,
                    "Dropping oversized message"
                );
                continue;
            }

            trace!(peer = %peer, bytes = packet.len(), "Packet received");
            let event = HostEvent::Receive {
                peer,
                channel: DEFAULT_CHANNEL,
                packet,
            };
            if events.send(event).is_err() {
                break;
            }
        }
    };

    tokio::select! {
        () = writer => {}
        () = reader => {}
    }

    shared.peers.remove(&peer);
    shared.release_slot();
    let _ = events.send(HostEvent::Disconnect { peer });

    debug!(peer = %peer, "WebSocket disconnected");
}
