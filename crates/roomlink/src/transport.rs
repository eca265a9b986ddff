//! Transport binding: the connection abstraction and its WebSocket implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use crate::types::{Error, Origin, TransportError};

// ---------------------------------------------------------------------------
// Address resolution
// ---------------------------------------------------------------------------

/// Resolve a configured address into the URL handed to the connector.
///
/// Addresses starting with `/` are joined onto `wss://{hostname}[:port]/` from
/// `origin`. Everything else is returned verbatim once it parses as a URL.
pub fn resolve_address(address: &str, origin: Option<&Origin>) -> crate::Result<String> {
    if !address.starts_with('/') {
        url::Url::parse(address)?;
        return Ok(address.to_string());
    }
    let origin = origin.ok_or_else(|| {
        Error::Address(format!("relative address {address:?} needs an origin"))
    })?;
    if origin.hostname.is_empty() {
        return Err(Error::Address("origin hostname is empty".to_string()));
    }
    let authority = match origin.port {
        Some(port) => format!("{}:{port}", origin.hostname),
        None => origin.hostname.clone(),
    };
    let base = url::Url::parse(&format!("wss://{authority}/"))?;
    Ok(base.join(address)?.to_string())
}

// ---------------------------------------------------------------------------
// Connection abstraction
// ---------------------------------------------------------------------------

/// Readiness of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Lifecycle events a connection reports to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(TransportError),
    Close,
}

/// Identifies one connection attempt within a session.
pub type ConnectionId = u64;

/// Where a connection delivers its events.
///
/// Once [`detach`](EventSink::detach) is called the sink silently drops
/// everything, so a replaced connection can no longer reach the session.
#[derive(Debug, Clone)]
pub struct EventSink {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    attached: Arc<AtomicBool>,
}

impl EventSink {
    pub(crate) fn new(
        id: ConnectionId,
        tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    ) -> Self {
        Self {
            id,
            tx,
            attached: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn emit(&self, event: TransportEvent) {
        if !self.attached.load(Ordering::Acquire) {
            return;
        }
        // Receiver gone means the session task has exited.
        let _ = self.tx.send((self.id, event));
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }
}

/// A live (or opening) connection owned by a session.
pub trait Connection: Send {
    /// Transmit one text frame. Fails when the connection is not open.
    fn send(&self, text: String) -> Result<(), TransportError>;
    fn ready_state(&self) -> ReadyState;
    /// Start closing. The connection reports `Close` through its sink when done.
    fn close(&mut self);
}

/// Opens connections. `open` must return immediately; the outcome arrives
/// later through `sink`.
pub trait Connector: Send + 'static {
    type Conn: Connection + 'static;

    fn open(&mut self, url: &str, sink: EventSink) -> Self::Conn;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

enum Outbound {
    Text(String),
    Close,
}

/// [`Connector`] over `tokio-tungstenite`. Must be used inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

/// Handle to a connection driven by a background task.
pub struct WsConnection {
    state: Arc<AtomicU8>,
    out_tx: mpsc::UnboundedSender<Outbound>,
}

impl Connector for WsConnector {
    type Conn = WsConnection;

    fn open(&mut self, url: &str, sink: EventSink) -> WsConnection {
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(
            url.to_string(),
            self.connect_timeout,
            Arc::clone(&state),
            out_rx,
            sink,
        ));
        WsConnection { state, out_tx }
    }
}

impl Connection for WsConnection {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::new("connection is not open"));
        }
        self.out_tx
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::new("connection task has exited"))
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn close(&mut self) {
        if matches!(self.ready_state(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        set_state(&self.state, ReadyState::Closing);
        let _ = self.out_tx.send(Outbound::Close);
    }
}

fn set_state(state: &AtomicU8, value: ReadyState) {
    state.store(value as u8, Ordering::Release);
}

async fn run_connection(
    url: String,
    connect_timeout: Duration,
    state: Arc<AtomicU8>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    sink: EventSink,
) {
    let connect = tokio::time::timeout(
        connect_timeout,
        tokio_tungstenite::connect_async(url.as_str()),
    );
    let ws = tokio::select! {
        result = connect => match result {
            Ok(Ok((ws, _resp))) => ws,
            Ok(Err(e)) => {
                let message = format!("Connect to {url} failed: {}", Error::from(e));
                fail(&state, &sink, message);
                return;
            }
            Err(_) => {
                fail(&state, &sink, format!("Connect to {url} timed out"));
                return;
            }
        },
        // Closed (or dropped) before the handshake finished.
        _ = wait_for_close(&mut out_rx) => {
            set_state(&state, ReadyState::Closed);
            sink.emit(TransportEvent::Close);
            return;
        }
    };

    // A close requested while the handshake was in flight wins over the open.
    if ReadyState::from_u8(state.load(Ordering::Acquire)) != ReadyState::Connecting {
        let (mut ws_write, _ws_read) = ws.split();
        let _ = ws_write.send(tungstenite::Message::Close(None)).await;
        set_state(&state, ReadyState::Closed);
        sink.emit(TransportEvent::Close);
        return;
    }

    let (mut ws_write, mut ws_read) = ws.split();
    set_state(&state, ReadyState::Open);
    sink.emit(TransportEvent::Open);

    loop {
        tokio::select! {
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        sink.emit(TransportEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        match String::from_utf8(data.to_vec()) {
                            Ok(text) => sink.emit(TransportEvent::Message(text)),
                            Err(_) => tracing::debug!("Ignoring non UTF-8 binary frame"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        tracing::debug!("WebSocket stream ended");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong control frames are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        let err = TransportError::new(Error::from(e).to_string());
                        sink.emit(TransportEvent::Error(err));
                        break;
                    }
                }
            }

            out = out_rx.recv() => {
                match out {
                    Some(Outbound::Text(text)) => {
                        let frame = tungstenite::Message::Text(text.into());
                        if let Err(e) = ws_write.send(frame).await {
                            let err = TransportError::new(Error::from(e).to_string());
                            sink.emit(TransportEvent::Error(err));
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        set_state(&state, ReadyState::Closing);
                        let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    set_state(&state, ReadyState::Closed);
    sink.emit(TransportEvent::Close);
}

/// Resolves once a close is requested or the handle is dropped. Text queued
/// before the socket opened is discarded; the session never sends it anyway
/// because `send` refuses while connecting.
async fn wait_for_close(out_rx: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match out_rx.recv().await {
            Some(Outbound::Close) | None => return,
            Some(Outbound::Text(_)) => {}
        }
    }
}

fn fail(state: &AtomicU8, sink: &EventSink, message: String) {
    tracing::debug!("{message}");
    sink.emit(TransportEvent::Error(TransportError::new(message)));
    set_state(state, ReadyState::Closed);
    sink.emit(TransportEvent::Close);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
