//! Resilient room-based publish/subscribe over a single WebSocket.
//!
//! A [`Client`] keeps one connection to a pub/sub endpoint and hides transient
//! failures from application code.
//!
//! # Features
//! - Automatic reconnection with capped exponential backoff
//! - Outbound queue: frames sent while disconnected are flushed on the next open
//! - Room subscriptions tracked as pending/confirmed and replayed after reconnect
//! - Periodic keepalive `ping`
//! - Ordered event handlers for lifecycle events and business actions
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), roomlink::Error> {
//! use roomlink::{Client, Config, Event};
//!
//! let client = Client::spawn(Config::new("wss://chat.example.com/ws"))?;
//! client.on("chat", |event: &Event| {
//!     if let Event::Message(frame) = event {
//!         println!("{:?}", frame.payload);
//!     }
//! });
//! client.subscribe("lobby");
//! client.publish("lobby", serde_json::json!({"text": "hi"}));
//! # Ok(())
//! # }
//! ```

mod backoff;
mod client;
mod dispatch;
mod ledger;
mod log;
pub mod protocol;
mod queue;
mod session;
pub mod transport;
mod types;

pub use client::Client;
pub use dispatch::Handler;
pub use log::{LogConfig, LogRecord, LogSink, category};
pub use protocol::Frame;
pub use types::{
    BackoffConfig, Config, ConnectionState, Error, Event, EventKind, Origin, Result,
    SessionSnapshot, TransportError,
};
