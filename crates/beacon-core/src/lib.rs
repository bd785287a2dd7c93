//! # beacon-core
//!
//! Routing engine of the Beacon pub/sub broker.
//!
//! This crate provides the broker's stateful building blocks:
//!
//! - **Topic** - A named set of subscribed peers
//! - **TopicRegistry** - Topic name to subscriber set, behind a single lock
//! - **ConnectionManager** - Live peers and cleanup on disconnect
//! - **Dispatcher** - The polling loop that drives everything from host events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌───────────────────┐
//! │    Host     │────▶│ Dispatcher  │────▶│ ConnectionManager │
//! └─────────────┘     └─────────────┘     └───────────────────┘
//!        ▲                   │                      │
//!        │ send              ▼                      ▼
//!        │            ┌─────────────┐        remove_all(peer)
//!        └────────────│  Registry   │◀──────────────┘
//!                     └─────────────┘
//! ```

pub mod dispatch;
pub mod lifecycle;
pub mod registry;
pub mod telemetry;
pub mod topic;

pub use dispatch::{
    DispatchConfig, DispatchState, DispatchStats, Dispatcher, StopHandle, MIN_POLL_TIMEOUT,
};
pub use lifecycle::{ConnectionManager, PeerInfo};
pub use registry::{RegistryConfig, RegistryStats, TopicRegistry};
pub use topic::Topic;
