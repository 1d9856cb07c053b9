#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    rust_2018_idioms
)]

//! # Barstream
//! Real-time OHLCV bar aggregation & subscription routing over a streamed trade-tick feed.
//!
//! Trade ticks arrive from an upstream streamer connection, are folded into the in-progress
//! [`Bar`] of their channel under the channel's [`Resolution`], and every updated bar is
//! delivered to each subscriber of that channel in registration order.
//!
//! The library includes:
//! - [`ChannelRegistry`]: channel -> subscription map, bar roll/update & fan-out
//! - [`StreamerClient`]: reconnecting WebSocket client for the upstream trade streamer
//! - [`engine::run`]: single-owner task serialising commands & streamer events onto the registry
//! - Protocol types for `SubAdd` / `SubRemove` control messages & inbound trade decoding
pub mod bar;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod resolution;
pub mod sink;
pub mod streamer;
pub mod streams;
pub mod transport;

// Re-export commonly used types for convenience
pub use bar::{Bar, TradeTick};
pub use channel::ChannelKey;
pub use config::StreamerConfig;
pub use engine::Command;
pub use error::DataError;
pub use registry::{ChannelRegistry, Subscription};
pub use resolution::Resolution;
pub use sink::{BarSink, FnSink, SubscriberId};
pub use streamer::StreamerClient;
pub use transport::{ConnectionStatus, StreamerEvent, Transport, WsTransport};
