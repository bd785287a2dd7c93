//! Connection lifecycle management.
//!
//! Tracks which peers are live and guarantees that a disconnected peer is
//! purged from every topic before its disconnect is considered handled.

use crate::registry::TopicRegistry;
use crate::telemetry;
use beacon_transport::PeerId;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What is known about a live peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Remote address, if the transport reports one.
    pub addr: Option<SocketAddr>,
    /// When the connection was registered.
    pub connected_at: Instant,
}

impl PeerInfo {
    /// Time since the peer connected.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Connection lifecycle manager.
pub struct ConnectionManager {
    peers: DashMap<PeerId, PeerInfo>,
    registry: Arc<TopicRegistry>,
}

impl ConnectionManager {
    /// Create a manager that cleans up `registry` on disconnect.
    #[must_use]
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self {
            peers: DashMap::new(),
            registry,
        }
    }

    /// Get the registry this manager cleans up.
    #[must_use]
    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Register a newly connected peer. Has no subscription side effect.
    pub fn on_connect(&self, peer: PeerId, addr: Option<SocketAddr>) {
        let info = PeerInfo {
            addr,
            connected_at: Instant::now(),
        };
        if self.peers.insert(peer, info).is_none() {
            telemetry::record_connection();
        }

        match addr {
            Some(addr) => info!(peer = %peer, addr = %addr, "Client connected"),
            None => info!(peer = %peer, "Client connected"),
        }
    }

    /// Handle a peer's disconnect.
    ///
    /// The peer is removed from every topic before this returns. Returns
    /// `true` if the peer was live; a repeated call is a no-op returning
    /// `false`.
    pub fn on_disconnect(&self, peer: PeerId) -> bool {
        let topics = self.registry.remove_all(peer);

        let Some((_, info)) = self.peers.remove(&peer) else {
            debug!(peer = %peer, "Disconnect for peer already cleaned up");
            return false;
        };

        telemetry::record_disconnection();
        info!(
            peer = %peer,
            topics,
            uptime_ms = info.uptime().as_millis() as u64,
            "Client disconnected"
        );
        true
    }

    /// Check if a peer is live.
    #[must_use]
    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    /// Get a live peer's info.
    #[must_use]
    pub fn peer_info(&self, peer: PeerId) -> Option<PeerInfo> {
        self.peers.get(&peer).map(|entry| entry.value().clone())
    }

    /// Number of live peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Handles of all live peers.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }
}
