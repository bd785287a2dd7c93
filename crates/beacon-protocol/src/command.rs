//! Command types for the Beacon protocol.
//!
//! A command is the structured form of one inbound transport message.

use bytes::Bytes;
use std::borrow::Borrow;
use std::fmt;

/// Byte-exact topic identifier.
///
/// Topic names are compared on their raw bytes with no normalization, so
/// `"News"` and `"news"` are different topics. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TopicName(Bytes);

impl TopicName {
    /// Create a topic name from raw bytes.
    #[must_use]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self(name.into())
    }

    /// Get the raw bytes of the name.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check if the name is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the length of the name in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Borrow<[u8]> for TopicName {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for TopicName {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<&'static str> for TopicName {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for TopicName {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Bytes> for TopicName {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

/// Command keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

impl CommandKind {
    /// The wire keyword for this command.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            CommandKind::Publish => "PUB",
            CommandKind::Subscribe => "SUB",
            CommandKind::Unsubscribe => "UNSUB",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl TryFrom<&[u8]> for CommandKind {
    type Error = ();

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            b"PUB" => Ok(CommandKind::Publish),
            b"SUB" => Ok(CommandKind::Subscribe),
            b"UNSUB" => Ok(CommandKind::Unsubscribe),
            _ => Err(()),
        }
    }
}

/// A parsed protocol command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Broadcast `payload` to every current subscriber of `topic`.
    Publish {
        /// Target topic.
        topic: TopicName,
        /// Opaque payload, delivered byte-for-byte.
        payload: Bytes,
    },

    /// Subscribe the sender to `topic`.
    Subscribe {
        /// Topic to join.
        topic: TopicName,
    },

    /// Unsubscribe the sender from `topic`.
    Unsubscribe {
        /// Topic to leave.
        topic: TopicName,
    },
}

impl Command {
    /// Create a publish command.
    pub fn publish(topic: impl Into<TopicName>, payload: impl Into<Bytes>) -> Self {
        Command::Publish {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Create a subscribe command.
    pub fn subscribe(topic: impl Into<TopicName>) -> Self {
        Command::Subscribe {
            topic: topic.into(),
        }
    }

    /// Create an unsubscribe command.
    pub fn unsubscribe(topic: impl Into<TopicName>) -> Self {
        Command::Unsubscribe {
            topic: topic.into(),
        }
    }

    /// Get the command kind.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Publish { .. } => CommandKind::Publish,
            Command::Subscribe { .. } => CommandKind::Subscribe,
            Command::Unsubscribe { .. } => CommandKind::Unsubscribe,
        }
    }

    /// Get the topic this command targets.
    #[must_use]
    pub fn topic(&self) -> &TopicName {
        match self {
            Command::Publish { topic, .. }
            | Command::Subscribe { topic }
            | Command::Unsubscribe { topic } => topic,
        }
    }
}
