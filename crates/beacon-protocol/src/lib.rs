//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon pub/sub broker.
//!
//! Every transport message carries exactly one command in the text form
//! `COMMAND:TOPIC:PAYLOAD`:
//!
//! - `PUB:<topic>:<payload>` - Broadcast a payload to the topic's subscribers
//! - `SUB:<topic>:` - Subscribe the sender to a topic
//! - `UNSUB:<topic>:` - Unsubscribe the sender from a topic
//!
//! Only the first two colons are delimiters; the payload is opaque and may
//! contain further colons.
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, Command};
//!
//! let command = codec::decode_slice(b"PUB:metrics:12:34:56").unwrap();
//! assert_eq!(command, Command::publish("metrics", &b"12:34:56"[..]));
//!
//! let encoded = codec::encode(&command);
//! assert_eq!(&encoded[..], b"PUB:metrics:12:34:56");
//! ```

pub mod codec;
pub mod command;

pub use codec::{decode, decode_slice, encode, ProtocolError};
pub use command::{Command, CommandKind, TopicName};
