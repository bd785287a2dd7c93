//! Topic registry for Beacon.
//!
//! The registry maps topic names to their subscriber sets and is the only
//! place that decides who receives a topic's next publish. Every access,
//! reads included, goes through a single registry-wide lock.

use crate::telemetry;
use crate::topic::Topic;
use beacon_protocol::{codec, TopicName};
use beacon_transport::{PeerId, PeerSender, DEFAULT_CHANNEL};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, trace, warn};

/// Registry configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Whether the empty string is a valid topic name.
    pub allow_empty_topics: bool,
    /// Whether to drop topics as soon as their last subscriber leaves.
    pub prune_empty_topics: bool,
}

/// The topic registry.
pub struct TopicRegistry {
    topics: Mutex<HashMap<TopicName, Topic>>,
    config: RegistryConfig,
}

impl TopicRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating topic registry with config: {:?}", config);
        Self {
            topics: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribe a peer to a topic, creating the topic if needed.
    ///
    /// Returns `true` if the peer was newly added. Subscribing an existing
    /// subscriber, or to a name the registry does not accept, changes
    /// nothing.
    pub fn subscribe(&self, peer: PeerId, topic: &TopicName) -> bool {
        if topic.is_empty() && !self.config.allow_empty_topics {
            debug!(peer = %peer, "Ignoring subscribe to empty topic name");
            return false;
        }

        let mut topics = self.topics.lock();
        let entry = topics.entry(topic.clone()).or_insert_with(|| {
            debug!(topic = %topic, "Creating new topic");
            Topic::new(topic.clone())
        });
        let added = entry.subscribe(peer);
        let topic_count = topics.len();
        drop(topics);

        telemetry::set_active_topics(topic_count);
        added
    }

    /// Unsubscribe a peer from a topic.
    ///
    /// Returns `true` if the peer was subscribed. Unknown topics and
    /// non-subscribers are ignored.
    pub fn unsubscribe(&self, peer: PeerId, topic: &TopicName) -> bool {
        let mut topics = self.topics.lock();
        let Some(entry) = topics.get_mut(topic) else {
            trace!(topic = %topic, peer = %peer, "Unsubscribe from unknown topic");
            return false;
        };

        let removed = entry.unsubscribe(peer);
        if self.config.prune_empty_topics && entry.is_empty() {
            topics.remove(topic);
            debug!(topic = %topic, "Deleted empty topic");
        }
        let topic_count = topics.len();
        drop(topics);

        telemetry::set_active_topics(topic_count);
        removed
    }

    /// Publish a payload to every current subscriber of a topic.
    ///
    /// The fan-out runs under the registry lock, so each publish reaches
    /// exactly the subscriber set at one instant. A failed send is logged
    /// and the fan-out continues. Returns the number of sends attempted,
    /// which is zero for an unknown topic.
    pub fn publish(&self, topic: &TopicName, payload: &[u8], sender: &dyn PeerSender) -> usize {
        let topics = self.topics.lock();
        let Some(entry) = topics.get(topic) else {
            trace!(topic = %topic, "Publish to unknown topic");
            return 0;
        };
        if entry.is_empty() {
            return 0;
        }

        let packet = codec::publish_packet(topic, payload);
        let mut attempted = 0;
        let mut failed = 0;
        for peer in entry.subscribers() {
            attempted += 1;
            if let Err(e) = sender.send(peer, DEFAULT_CHANNEL, packet.clone()) {
                failed += 1;
                warn!(topic = %topic, peer = %peer, error = %e, "Send to subscriber failed");
            }
        }
        drop(topics);

        telemetry::record_fanout(attempted, failed);
        trace!(topic = %topic, recipients = attempted, failed, "Published message");
        attempted
    }

    /// Remove a peer from every topic.
    ///
    /// Returns the number of topics the peer was removed from. Calling it
    /// again for the same peer is a no-op.
    pub fn remove_all(&self, peer: PeerId) -> usize {
        let mut topics = self.topics.lock();
        let removed = topics
            .values_mut()
            .map(|topic| topic.unsubscribe(peer))
            .filter(|&removed| removed)
            .count();
        if self.config.prune_empty_topics {
            topics.retain(|_, topic| !topic.is_empty());
        }
        let topic_count = topics.len();
        drop(topics);

        telemetry::set_active_topics(topic_count);
        debug!(peer = %peer, topics = removed, "Removed peer from all topics");
        removed
    }

    /// Drop every topic that has no subscribers.
    ///
    /// Returns the number of topics dropped.
    pub fn prune_empty(&self) -> usize {
        let mut topics = self.topics.lock();
        let before = topics.len();
        topics.retain(|_, topic| !topic.is_empty());
        let after = topics.len();
        drop(topics);

        telemetry::set_active_topics(after);
        before - after
    }

    /// Check if a topic exists.
    #[must_use]
    pub fn topic_exists(&self, topic: &TopicName) -> bool {
        self.topics.lock().contains_key(topic)
    }

    /// Get the subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &TopicName) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(Topic::subscriber_count)
            .unwrap_or(0)
    }

    /// Check if a peer is subscribed to a topic.
    #[must_use]
    pub fn is_subscribed(&self, peer: PeerId, topic: &TopicName) -> bool {
        self.topics
            .lock()
            .get(topic)
            .is_some_and(|t| t.is_subscribed(peer))
    }

    /// Get all topic names.
    #[must_use]
    pub fn topic_names(&self) -> Vec<TopicName> {
        self.topics.lock().keys().cloned().collect()
    }

    /// Get the topics a peer is subscribed to.
    #[must_use]
    pub fn topics_for(&self, peer: PeerId) -> Vec<TopicName> {
        self.topics
            .lock()
            .values()
            .filter(|t| t.is_subscribed(peer))
            .map(|t| t.name().clone())
            .collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let topics = self.topics.lock();
        RegistryStats {
            topic_count: topics.len(),
            empty_topic_count: topics.values().filter(|t| t.is_empty()).count(),
            total_subscriptions: topics.values().map(Topic::subscriber_count).sum(),
        }
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of known topics.
    pub topic_count: usize,
    /// Number of topics with no subscribers.
    pub empty_topic_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}
