//! Topic abstraction for Beacon.
//!
//! A topic is a named set of subscribed peers. Each peer appears at most
//! once; subscribing twice leaves the set unchanged.

use beacon_protocol::TopicName;
use beacon_transport::PeerId;
use std::collections::HashSet;
use tracing::debug;

/// A topic and its current subscribers.
#[derive(Debug, Clone)]
pub struct Topic {
    name: TopicName,
    subscribers: HashSet<PeerId>,
}

impl Topic {
    /// Create a topic with no subscribers.
    #[must_use]
    pub fn new(name: impl Into<TopicName>) -> Self {
        Self {
            name: name.into(),
            subscribers: HashSet::new(),
        }
    }

    /// Get the topic name.
    #[must_use]
    pub fn name(&self) -> &TopicName {
        &self.name
    }

    /// Get the number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a peer is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, peer: PeerId) -> bool {
        self.subscribers.contains(&peer)
    }

    /// Subscribe a peer.
    ///
    /// Returns `true` if the peer was not already subscribed.
    pub fn subscribe(&mut self, peer: PeerId) -> bool {
        let added = self.subscribers.insert(peer);
        if added {
            debug!(topic = %self.name, peer = %peer, "Peer subscribed");
        }
        added
    }

    /// Unsubscribe a peer.
    ///
    /// Returns `true` if the peer was subscribed.
    pub fn unsubscribe(&mut self, peer: PeerId) -> bool {
        let removed = self.subscribers.remove(&peer);
        if removed {
            debug!(topic = %self.name, peer = %peer, "Peer unsubscribed");
        }
        removed
    }

    /// Iterate over the subscribers.
    pub fn subscribers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.subscribers.iter().copied()
    }

    /// Check if the topic has no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
