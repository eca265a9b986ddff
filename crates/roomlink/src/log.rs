//! Session-scoped logger.
//!
//! Each session holds its own [`Logger`]. Without a sink, records go to
//! `tracing` with a `category` field; with a sink, the sink receives them
//! instead. A disabled logger drops everything.

use std::fmt;
use std::sync::Arc;

use tracing::Level;

/// A single log entry handed to a custom sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub category: &'static str,
    pub message: String,
}

/// Custom log sink. Must not panic.
pub type LogSink = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// Logging part of [`Config`](crate::Config).
#[derive(Clone)]
pub struct LogConfig {
    pub enabled: bool,
    pub sink: Option<LogSink>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sink: None,
        }
    }
}

impl fmt::Debug for LogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogConfig")
            .field("enabled", &self.enabled)
            .field("sink", &self.sink.as_ref().map(|_| "custom"))
            .finish()
    }
}

pub mod category {
    pub const CONNECTION: &str = "connection";
    pub const RECONNECT: &str = "reconnect";
    pub const KEEPALIVE: &str = "keepalive";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const SEND: &str = "send";
    pub const DECODE: &str = "decode";
    pub const DISPATCH: &str = "dispatch";
}

#[derive(Clone)]
pub(crate) struct Logger {
    enabled: bool,
    sink: Option<LogSink>,
}

impl Logger {
    pub(crate) fn new(config: LogConfig) -> Self {
        Self {
            enabled: config.enabled,
            sink: config.sink,
        }
    }

    pub(crate) fn debug(&self, category: &'static str, message: impl fmt::Display) {
        self.log(Level::DEBUG, category, message);
    }

    pub(crate) fn info(&self, category: &'static str, message: impl fmt::Display) {
        self.log(Level::INFO, category, message);
    }

    pub(crate) fn warn(&self, category: &'static str, message: impl fmt::Display) {
        self.log(Level::WARN, category, message);
    }

    fn log(&self, level: Level, category: &'static str, message: impl fmt::Display) {
        if !self.enabled {
            return;
        }
        if let Some(sink) = &self.sink {
            sink(&LogRecord {
                level,
                category,
                message: message.to_string(),
            });
            return;
        }
        // tracing macros need a constant level
        if level == Level::WARN {
            tracing::warn!(category, "{message}");
        } else if level == Level::INFO {
            tracing::info!(category, "{message}");
        } else {
            tracing::debug!(category, "{message}");
        }
    }
}
