//! Public types for the roomlink crate.

use std::fmt;
use std::time::Duration;

use tokio_tungstenite::tungstenite;

use crate::log::LogConfig;
use crate::protocol::Frame;

pub(crate) const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(10);
pub(crate) const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_MULTIPLIER: f64 = 2.0;
pub(crate) const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Error,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Error reported by a transport through its `error` event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Events handed to handlers registered with [`Client::on`](crate::Client::on).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A connection was opened; the queue has been flushed and rooms re-requested.
    Connect,
    /// The connection closed, or the session was disconnected.
    Close,
    /// The transport reported an error.
    Error(TransportError),
    /// A decoded inbound frame. Delivered to `message` handlers and to
    /// handlers registered for the frame's action.
    Message(Frame),
}

/// Key of the dispatch table: a reserved lifecycle kind or a business action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Close,
    Error,
    Message,
    Action(String),
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        match name {
            "connect" => EventKind::Connect,
            "close" => EventKind::Close,
            "error" => EventKind::Error,
            "message" => EventKind::Message,
            other => EventKind::Action(other.to_string()),
        }
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        EventKind::from(name.as_str())
    }
}

/// Host environment used to resolve addresses that start with `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub hostname: String,
    pub port: Option<u16>,
}

impl Origin {
    pub fn new(hostname: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

/// Exponential backoff parameters for reconnect scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Configuration for [`Client::spawn`](crate::Client::spawn).
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute `ws://`/`wss://` URL, or a path starting with `/` resolved
    /// against [`origin`](Config::origin).
    pub address: String,
    /// Host environment for relative addresses.
    pub origin: Option<Origin>,
    /// Interval between `ping` frames. Values below 10ms are raised to 10ms;
    /// `Duration::MAX` disables keepalive.
    pub keepalive_interval: Duration,
    pub backoff: BackoffConfig,
    /// Whether a close schedules a reconnect. Can be toggled at runtime.
    pub reconnect_enabled: bool,
    /// Open the connection as soon as the client is spawned.
    pub connect_on_start: bool,
    /// Upper bound on the transport handshake.
    pub connect_timeout: Duration,
    pub log: LogConfig,
}

impl Config {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            origin: None,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            backoff: BackoffConfig::default(),
            reconnect_enabled: true,
            connect_on_start: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            log: LogConfig::default(),
        }
    }
}

/// Point-in-time view of a session, returned by
/// [`Client::snapshot`](crate::Client::snapshot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub pending: Vec<String>,
    pub confirmed: Vec<String>,
    pub queued: usize,
    pub reconnect_attempts: u32,
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("frame encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("frame decode error: {0}")]
    Decode(serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("session closed")]
    Closed,
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
