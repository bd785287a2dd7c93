//! # beacon-transport
//!
//! Transport abstraction layer for the Beacon pub/sub broker.
//!
//! The broker sees its transport through two traits:
//!
//! - **`Host`** - Polls for connect, receive and disconnect events with a
//!   bounded wait
//! - **`PeerSender`** - Non-blocking, fire-and-forget send to one peer
//!
//! Implementations:
//!
//! - **WebSocket** - The standard network host (feature `websocket`)
//! - **Memory** - In-process host for tests and benchmarks
//!
//! ```rust,ignore
//! use beacon_transport::{Host, HostEvent};
//! use std::time::Duration;
//!
//! async fn drain(host: &mut impl Host) {
//!     while let Ok(Some(event)) = host.service(Duration::from_millis(100)).await {
//!         // Process event
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryClient, MemoryConnector, MemoryHost};
pub use traits::{
    ChannelId, Host, HostConfig, HostEvent, PeerId, PeerSender, TransportError, CHANNEL_COUNT,
    DEFAULT_CHANNEL,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketHost;
