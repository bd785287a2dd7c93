//! Transport abstraction traits for Beacon.
//!
//! A host owns the listening side of a reliable message transport. It
//! surfaces connection lifecycle and inbound packets as [`HostEvent`]s and
//! exposes a non-blocking send primitive.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Logical channel within a peer connection.
pub type ChannelId = u8;

/// The channel carrying protocol commands.
pub const DEFAULT_CHANNEL: ChannelId = 0;

/// Logical channels allocated per peer.
pub const CHANNEL_COUNT: usize = 2;

/// Opaque handle for a connected peer.
///
/// Handles come from a process-wide counter and are never reused, so a
/// handle held after disconnect can only ever refer to the dead connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

impl PeerId {
    /// Create a peer ID from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocate a fresh, never-before-seen peer ID.
    #[must_use]
    pub fn allocate() -> Self {
        Self(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// An event surfaced by a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A peer finished connecting.
    Connect {
        peer: PeerId,
        addr: Option<SocketAddr>,
    },
    /// A peer sent a packet.
    Receive {
        peer: PeerId,
        channel: ChannelId,
        packet: Bytes,
    },
    /// A peer's connection closed. Emitted exactly once per connection.
    Disconnect { peer: PeerId },
}

impl HostEvent {
    /// Get the peer this event concerns.
    #[must_use]
    pub fn peer(&self) -> PeerId {
        match self {
            HostEvent::Connect { peer, .. }
            | HostEvent::Receive { peer, .. }
            | HostEvent::Disconnect { peer } => *peer,
        }
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind the listening socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The peer is not connected to this host.
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// The peer's connection is closing and can no longer accept packets.
    #[error("Connection closed: {0}")]
    ConnectionClosed(PeerId),

    /// The channel is outside the negotiated channel count.
    #[error("Invalid channel {channel} (host has {limit} channels)")]
    InvalidChannel { channel: ChannelId, limit: usize },

    /// The host is at its peer limit.
    #[error("Peer limit of {0} reached")]
    PeerLimitReached(usize),

    /// The host's event source has shut down.
    #[error("Host closed")]
    Closed,

    /// Handshake with a connecting peer failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum number of simultaneously connected peers.
    pub max_peers: usize,
    /// Logical channels per peer.
    pub channel_count: usize,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1234)),
            max_peers: 32,
            channel_count: CHANNEL_COUNT,
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// The send primitive of a transport.
///
/// Sends enqueue the packet and return immediately; delivery and retry
/// belong to the transport.
pub trait PeerSender: Send + Sync {
    /// Queue `packet` for delivery to `peer` on `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is unknown, closing, or the channel is
    /// out of range.
    fn send(&self, peer: PeerId, channel: ChannelId, packet: Bytes) -> Result<(), TransportError>;
}

/// A transport host that peers connect to.
#[async_trait]
pub trait Host: PeerSender {
    /// Wait up to `timeout` for the next event.
    ///
    /// Returns `Ok(None)` when the wait elapses with nothing to report. A
    /// zero timeout never waits.
    async fn service(&mut self, timeout: Duration) -> Result<Option<HostEvent>, TransportError>;

    /// Push queued packets toward the network.
    fn flush(&mut self) {}

    /// Number of currently connected peers.
    fn peer_count(&self) -> usize;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// Check a channel against a host's channel count.
pub(crate) fn check_channel(channel: ChannelId, limit: usize) -> Result<(), TransportError> {
    if usize::from(channel) >= limit {
        return Err(TransportError::InvalidChannel { channel, limit });
    }
    Ok(())
}
