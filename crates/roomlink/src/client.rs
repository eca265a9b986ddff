//! Public entry point: [`Client`] and the task that owns the session.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::dispatch::Handler;
use crate::protocol::Frame;
use crate::session::Session;
use crate::transport::{ConnectionId, Connector, TransportEvent, WsConnector, resolve_address};
use crate::types::{Config, ConnectionState, Error, Event, EventKind, SessionSnapshot};

enum Command {
    Connect,
    Disconnect,
    Subscribe(String),
    Unsubscribe(String),
    Publish(String, serde_json::Value),
    Send(Frame),
    On(EventKind, Handler),
    SetReconnect(bool),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Cleanup(Option<oneshot::Sender<()>>),
}

/// Handle to a running session.
///
/// Every method returns immediately; the work happens on a background task
/// and its outcome is observed through registered handlers and
/// [`state`](Client::state). Dropping the handle cleans the session up.
pub struct Client {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Client {
    /// Spawn a session over WebSocket. Must be called inside a tokio runtime.
    ///
    /// Fails only when the configured address cannot be resolved.
    pub fn spawn(config: Config) -> crate::Result<Self> {
        let connector = WsConnector::new(config.connect_timeout);
        Self::spawn_with(config, connector)
    }

    /// Spawn a session over a custom [`Connector`].
    pub fn spawn_with<C: Connector>(config: Config, connector: C) -> crate::Result<Self> {
        let url = resolve_address(&config.address, config.origin.as_ref())?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let session = Session::new(&config, url, connector, events_tx);
        let state_rx = session.watch_state();
        if config.connect_on_start {
            let _ = cmd_tx.send(Command::Connect);
        }
        tokio::spawn(run_session(session, cmd_rx, events_rx));

        Ok(Self { cmd_tx, state_rx })
    }

    fn command(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::debug!("Session task has exited, ignoring command");
        }
    }

    /// Open a connection, replacing the current one if any.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection and forget queued frames and rooms. No reconnect follows.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self, room: impl Into<String>) {
        self.command(Command::Subscribe(room.into()));
    }

    pub fn unsubscribe(&self, room: impl Into<String>) {
        self.command(Command::Unsubscribe(room.into()));
    }

    /// Publish to a room. Subscription to the room is not required.
    pub fn publish(&self, room: impl Into<String>, payload: serde_json::Value) {
        self.command(Command::Publish(room.into(), payload));
    }

    /// Send an arbitrary frame; queued while disconnected.
    pub fn send(&self, frame: Frame) {
        self.command(Command::Send(frame));
    }

    /// Register a handler for a lifecycle kind (`"connect"`, `"close"`,
    /// `"error"`, `"message"`) or a business action name.
    pub fn on<F>(&self, kind: impl Into<EventKind>, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.command(Command::On(kind.into(), Box::new(handler)));
    }

    /// Toggle reconnection. Takes effect when the next reconnect timer fires.
    pub fn set_reconnect_enabled(&self, enabled: bool) {
        self.command(Command::SetReconnect(enabled));
    }

    pub async fn snapshot(&self) -> crate::Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot(tx))
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Tear the session down and wait until it is gone.
    pub async fn cleanup(self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Cleanup(Some(tx))).is_ok() {
            let _ = rx.await;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Cleanup(None));
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run_session<C: Connector>(
    mut session: Session<C>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut events_rx: mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>,
) {
    loop {
        let reconnect_at = session.reconnect_deadline();
        let keepalive_at = session.keepalive_deadline();

        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    session.cleanup();
                    return;
                };
                apply(&mut session, cmd);
                if session.is_terminated() {
                    tracing::debug!(state = %session.state(), "Session task exiting");
                    return;
                }
            }

            Some((id, event)) = events_rx.recv() => {
                session.handle_transport_event(id, event);
            }

            _ = sleep_until(reconnect_at) => {
                session.on_reconnect_timer();
            }

            _ = sleep_until(keepalive_at) => {
                session.on_keepalive_tick();
            }
        }
    }
}

fn apply<C: Connector>(session: &mut Session<C>, cmd: Command) {
    match cmd {
        Command::Connect => session.connect(),
        Command::Disconnect => session.disconnect(),
        Command::Subscribe(room) => session.subscribe(&room),
        Command::Unsubscribe(room) => session.unsubscribe(&room),
        Command::Publish(room, payload) => session.publish(&room, payload),
        Command::Send(frame) => session.send(frame),
        Command::On(kind, handler) => session.on(kind, handler),
        Command::SetReconnect(enabled) => session.set_reconnect_enabled(enabled),
        Command::Snapshot(reply) => {
            let _ = reply.send(session.snapshot());
        }
        Command::Cleanup(reply) => {
            session.cleanup();
            if let Some(reply) = reply {
                let _ = reply.send(());
            }
        }
    }
}
