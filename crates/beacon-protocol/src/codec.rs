//! Codec for encoding and decoding Beacon commands.
//!
//! The wire format is `COMMAND:TOPIC:PAYLOAD`. Decoding splits on the first
//! colon, then on the first colon of the remainder. Everything after the
//! second colon is the payload, copied verbatim.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::command::{Command, CommandKind, TopicName};

/// Structural delimiter.
pub const DELIMITER: u8 = b':';

/// Protocol errors that can occur during decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Fewer than two delimiters in the message.
    #[error("Malformed command: expected 2 delimiters, found {found}")]
    MissingDelimiter {
        /// Number of delimiters present.
        found: usize,
    },

    /// The command keyword is not recognized.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

/// Decode a command from a transport packet.
///
/// The topic and payload are zero-copy slices of `packet`.
///
/// # Errors
///
/// Returns an error if the packet has fewer than two delimiters or the
/// command keyword is unknown.
pub fn decode(packet: Bytes) -> Result<Command, ProtocolError> {
    let first = find_delimiter(&packet, 0).ok_or(ProtocolError::MissingDelimiter { found: 0 })?;
    let second =
        find_delimiter(&packet, first + 1).ok_or(ProtocolError::MissingDelimiter { found: 1 })?;

    let kind = CommandKind::try_from(&packet[..first]).map_err(|()| {
        ProtocolError::UnknownCommand(String::from_utf8_lossy(&packet[..first]).into_owned())
    })?;

    let topic = TopicName::new(packet.slice(first + 1..second));

    Ok(match kind {
        CommandKind::Publish => Command::Publish {
            topic,
            payload: packet.slice(second + 1..),
        },
        CommandKind::Subscribe => Command::Subscribe { topic },
        CommandKind::Unsubscribe => Command::Unsubscribe { topic },
    })
}

/// Decode a command from a borrowed slice, copying it first.
///
/// # Errors
///
/// Returns an error if the data is malformed.
pub fn decode_slice(data: &[u8]) -> Result<Command, ProtocolError> {
    decode(Bytes::copy_from_slice(data))
}

/// Encode a command to bytes.
///
/// `SUB` and `UNSUB` carry an empty payload section (`SUB:topic:`).
#[must_use]
pub fn encode(command: &Command) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(command));
    encode_into(command, &mut buf);
    buf.freeze()
}

/// Encode a command into an existing buffer.
pub fn encode_into(command: &Command, buf: &mut BytesMut) {
    buf.reserve(encoded_len(command));
    buf.put_slice(command.kind().keyword().as_bytes());
    buf.put_u8(DELIMITER);
    buf.put_slice(command.topic().as_bytes());
    buf.put_u8(DELIMITER);
    if let Command::Publish { payload, .. } = command {
        buf.put_slice(payload);
    }
}

/// Encode the packet broadcast to subscribers for a publish.
#[must_use]
pub fn publish_packet(topic: &TopicName, payload: &[u8]) -> Bytes {
    let keyword = CommandKind::Publish.keyword().as_bytes();
    let mut buf = BytesMut::with_capacity(keyword.len() + topic.len() + payload.len() + 2);
    buf.put_slice(keyword);
    buf.put_u8(DELIMITER);
    buf.put_slice(topic.as_bytes());
    buf.put_u8(DELIMITER);
    buf.put_slice(payload);
    buf.freeze()
}

fn encoded_len(command: &Command) -> usize {
    let payload = match command {
        Command::Publish { payload, .. } => payload.len(),
        _ => 0,
    };
    command.kind().keyword().len() + command.topic().len() + payload + 2
}

fn find_delimiter(data: &[u8], from: usize) -> Option<usize> {
    data[from..]
        .iter()
        .position(|&b| b == DELIMITER)
        .map(|pos| from + pos)
}
