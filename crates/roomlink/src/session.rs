//! Session state machine: connection lifecycle, queueing, resubscription,
//! reconnect scheduling and keepalive.
//!
//! A [`Session`] is owned by exactly one task (see [`crate::client`]). Every
//! method runs to completion without awaiting; timers are exposed as deadlines
//! the owning task sleeps on.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::dispatch::{Dispatcher, Handler};
use crate::ledger::{Confirm, SubscriptionLedger};
use crate::log::{Logger, category};
use crate::protocol::{Frame, action, decode_frame, encode_frame};
use crate::queue::OutboundQueue;
use crate::transport::{
    Connection, ConnectionId, Connector, EventSink, ReadyState, TransportEvent,
};
use crate::types::{
    Config, ConnectionState, Event, EventKind, MIN_KEEPALIVE_INTERVAL, SessionSnapshot,
    TransportError,
};

/// `after` from now, or `None` if that lies beyond what `Instant` can hold.
fn deadline_in(after: Duration) -> Option<Instant> {
    Instant::now().checked_add(after)
}

/// The current connection together with the sink it reports through.
struct Live<T> {
    sink: EventSink,
    conn: T,
}

pub(crate) struct Session<C: Connector> {
    connector: C,
    url: String,
    live: Option<Live<C::Conn>>,
    next_id: ConnectionId,
    events_tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    queue: OutboundQueue,
    ledger: SubscriptionLedger,
    backoff: Backoff,
    reconnect_enabled: bool,
    reconnect_at: Option<Instant>,
    keepalive_interval: Duration,
    keepalive_at: Option<Instant>,
    dispatcher: Dispatcher,
    log: Logger,
    terminated: bool,
}

impl<C: Connector> Session<C> {
    pub(crate) fn new(
        config: &Config,
        url: String,
        connector: C,
        events_tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            connector,
            url,
            live: None,
            next_id: 1,
            events_tx,
            state: ConnectionState::Connecting,
            state_tx,
            queue: OutboundQueue::default(),
            ledger: SubscriptionLedger::default(),
            backoff: Backoff::new(&config.backoff),
            reconnect_enabled: config.reconnect_enabled,
            reconnect_at: None,
            keepalive_interval: config.keepalive_interval.max(MIN_KEEPALIVE_INTERVAL),
            keepalive_at: None,
            dispatcher: Dispatcher::default(),
            log: Logger::new(config.log.clone()),
            terminated: false,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub(crate) fn keepalive_deadline(&self) -> Option<Instant> {
        self.keepalive_at
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            pending: self.ledger.pending(),
            confirmed: self.ledger.confirmed(),
            queued: self.queue.len(),
            reconnect_attempts: self.backoff.attempts(),
        }
    }

    fn is_open(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.conn.ready_state() == ReadyState::Open)
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&mut self, kind: EventKind, event: &Event) {
        self.dispatcher.emit(&kind, event);
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Open a fresh connection, tearing down any existing one first.
    pub(crate) fn connect(&mut self) {
        if self.terminated {
            self.log
                .warn(category::CONNECTION, "Connect ignored: session cleaned up");
            return;
        }
        self.teardown_connection();
        self.reconnect_at = None;

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let sink = EventSink::new(id, self.events_tx.clone());
        self.log.info(
            category::CONNECTION,
            format_args!("Connecting to {} (connection {id})", self.url),
        );
        let conn = self.connector.open(&self.url, sink.clone());
        self.live = Some(Live { sink, conn });
        self.set_state(ConnectionState::Connecting);
        self.keepalive_at = deadline_in(self.keepalive_interval);
    }

    /// Detach and close the current connection, if any.
    fn teardown_connection(&mut self) {
        if let Some(mut live) = self.live.take() {
            live.sink.detach();
            live.conn.close();
            self.log.debug(
                category::CONNECTION,
                format_args!("Connection {} detached", live.sink.id()),
            );
        }
    }

    /// Route one event reported by a connection.
    pub(crate) fn handle_transport_event(&mut self, id: ConnectionId, event: TransportEvent) {
        let current = self.live.as_ref().map(|live| live.sink.id());
        if self.terminated || current != Some(id) {
            self.log.debug(
                category::CONNECTION,
                format_args!("Dropping event from stale connection {id}"),
            );
            return;
        }
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Error(err) => self.on_error(err),
            TransportEvent::Close => self.on_close(),
        }
    }

    fn on_open(&mut self) {
        self.set_state(ConnectionState::Connected);
        self.backoff.reset();
        self.log.info(category::CONNECTION, "Connected");
        self.flush();
        for room in self.ledger.drain() {
            self.subscribe(&room);
        }
        self.emit(EventKind::Connect, &Event::Connect);
    }

    fn on_error(&mut self, err: TransportError) {
        self.log
            .warn(category::CONNECTION, format_args!("Transport error: {err}"));
        self.set_state(ConnectionState::Error);
        self.emit(EventKind::Error, &Event::Error(err));
    }

    fn on_close(&mut self) {
        let prior = self.state;
        self.set_state(ConnectionState::Closed);
        self.log.info(category::CONNECTION, "Connection closed");
        self.emit(EventKind::Close, &Event::Close);
        if prior == ConnectionState::Connecting {
            self.log.debug(
                category::RECONNECT,
                "Closed while connecting, not scheduling a reconnect",
            );
            return;
        }
        self.schedule_reconnect();
    }

    /// User-initiated close. Clears queue and ledger; never reconnects.
    pub(crate) fn disconnect(&mut self) {
        self.keepalive_at = None;
        self.reconnect_at = None;
        self.teardown_connection();
        self.set_state(ConnectionState::Closed);
        self.emit(EventKind::Close, &Event::Close);
        self.queue.clear();
        self.ledger.clear();
        self.log.info(category::CONNECTION, "Disconnected");
    }

    /// Terminal teardown. The session ignores everything afterwards.
    pub(crate) fn cleanup(&mut self) {
        if self.terminated {
            return;
        }
        self.disconnect();
        self.backoff.reset();
        self.dispatcher.clear();
        self.terminated = true;
        self.log.debug(category::CONNECTION, "Session cleaned up");
    }

    // -----------------------------------------------------------------------
    // Reconnect
    // -----------------------------------------------------------------------

    fn schedule_reconnect(&mut self) {
        let attempt = self.backoff.attempts();
        let delay = self.backoff.next_delay();
        self.reconnect_at = deadline_in(delay);
        if self.reconnect_at.is_none() {
            self.log.warn(
                category::RECONNECT,
                format_args!("Reconnect delay {delay:?} is out of range, not scheduling"),
            );
            return;
        }
        self.log.info(
            category::RECONNECT,
            format_args!("Reconnect attempt {} in {}ms", attempt + 1, delay.as_millis()),
        );
    }

    pub(crate) fn on_reconnect_timer(&mut self) {
        self.reconnect_at = None;
        if !self.reconnect_enabled {
            self.log
                .info(category::RECONNECT, "Reconnect disabled, staying closed");
            return;
        }
        self.connect();
    }

    pub(crate) fn set_reconnect_enabled(&mut self, enabled: bool) {
        self.reconnect_enabled = enabled;
        self.log.debug(
            category::RECONNECT,
            format_args!("Reconnect enabled: {enabled}"),
        );
    }

    // -----------------------------------------------------------------------
    // Keepalive
    // -----------------------------------------------------------------------

    pub(crate) fn on_keepalive_tick(&mut self) {
        self.keepalive_at = deadline_in(self.keepalive_interval);
        if !self.is_open() {
            self.log
                .debug(category::KEEPALIVE, "Not connected, skipping ping");
            return;
        }
        self.log.debug(category::KEEPALIVE, "Ping");
        self.send(Frame::ping());
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Transmit now if open, otherwise queue.
    pub(crate) fn send(&mut self, frame: Frame) {
        let text = match encode_frame(&frame) {
            Ok(text) => text,
            Err(e) => {
                self.log.warn(
                    category::SEND,
                    format_args!("Dropping {} frame: {e}", frame.action),
                );
                return;
            }
        };
        if let Some(live) = self.live.as_ref().filter(|_| self.is_open()) {
            match live.conn.send(text.clone()) {
                Ok(()) => return,
                Err(e) => self.log.warn(
                    category::SEND,
                    format_args!("Send failed ({e}), queueing {} frame", frame.action),
                ),
            }
        }
        self.queue.push(text);
        self.log.debug(
            category::SEND,
            format_args!("Queued {} frame ({} waiting)", frame.action, self.queue.len()),
        );
    }

    fn flush(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let Some(live) = self.live.as_ref() else {
            return;
        };
        let waiting = self.queue.len();
        let sent = self.queue.flush(&live.conn);
        self.log.debug(
            category::SEND,
            format_args!("Flushed {sent}/{waiting} queued frames"),
        );
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    pub(crate) fn subscribe(&mut self, room: &str) {
        if !self.ledger.begin(room) {
            self.log.debug(
                category::SUBSCRIPTION,
                format_args!("Already subscribed to {room}"),
            );
            return;
        }
        self.send(Frame::subscribe(room));
    }

    pub(crate) fn unsubscribe(&mut self, room: &str) {
        if !self.ledger.remove(room) {
            self.log.debug(
                category::SUBSCRIPTION,
                format_args!("Not subscribed to {room}"),
            );
            return;
        }
        self.send(Frame::unsubscribe(room));
    }

    pub(crate) fn publish(&mut self, room: &str, payload: serde_json::Value) {
        self.send(Frame::publish(room, payload));
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    pub(crate) fn on(&mut self, kind: EventKind, handler: Handler) {
        if self.terminated {
            return;
        }
        self.dispatcher.on(kind, handler);
    }

    fn on_message(&mut self, text: &str) {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.log
                    .warn(category::DECODE, format_args!("Dropping frame: {e}"));
                return;
            }
        };
        let name = frame.action.clone();
        let room = frame.room.clone();
        let event = Event::Message(frame);
        self.emit(EventKind::Message, &event);

        match (name.as_str(), room) {
            (action::SUBSCRIBED, Some(room)) => match self.ledger.confirm(&room) {
                Confirm::Confirmed => self.log.info(
                    category::SUBSCRIPTION,
                    format_args!("Subscribed to {room}"),
                ),
                Confirm::AlreadyConfirmed => {}
                Confirm::NotPending => self.log.debug(
                    category::SUBSCRIPTION,
                    format_args!("Ignoring ack for unknown room {room}"),
                ),
            },
            (action::PONG, _) => self.log.debug(category::KEEPALIVE, "Pong"),
            _ => {
                let ran = self.dispatcher.emit(&EventKind::Action(name.clone()), &event);
                if ran == 0 {
                    self.log.debug(
                        category::DISPATCH,
                        format_args!("No handlers for {name}"),
                    );
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
