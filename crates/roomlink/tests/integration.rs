use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use roomlink::{BackoffConfig, Client, Config, ConnectionState, Event};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

struct MockRoomServer {
    listener: TcpListener,
    port: u16,
}

impl MockRoomServer {
    async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Accept one TCP connection and complete the WebSocket handshake.
    async fn accept(&self) -> Result<WsStream, Box<dyn std::error::Error>> {
        let (tcp, _) = self.listener.accept().await?;
        let ws = tokio_tungstenite::accept_async(tcp).await?;
        Ok(ws)
    }
}

/// Read the next text frame as JSON, skipping control frames.
async fn read_frame(ws: &mut WsStream) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    loop {
        let frame = ws.next().await.ok_or("WebSocket closed unexpectedly")??;
        match frame {
            tungstenite::Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
            tungstenite::Message::Close(_) => return Err("client closed".into()),
            _ => {}
        }
    }
}

async fn send_frame(
    ws: &mut WsStream,
    frame: serde_json::Value,
) -> Result<(), Box<dyn std::error::Error>> {
    ws.send(tungstenite::Message::Text(frame.to_string().into()))
        .await?;
    Ok(())
}

fn test_config(server: &MockRoomServer) -> Config {
    let mut config = Config::new(server.url());
    config.backoff = BackoffConfig {
        base_delay: Duration::from_millis(10),
        multiplier: 2.0,
        max_delay: Duration::from_millis(100),
    };
    config.connect_timeout = Duration::from_secs(5);
    config
}

/// Register a handler that forwards every event of `kind` into a channel.
fn forward(client: &Client, kind: &str) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(kind, move |event: &Event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("handler channel closed")
}

async fn wait_for_state(client: &Client, want: ConnectionState) {
    let mut rx = client.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for state")
        .expect("session task exited");
}

// ---------------------------------------------------------------------------
// Test 1: frames published while disconnected go out exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queued_publish_is_sent_once_after_connect() {
    let server = MockRoomServer::start().await.unwrap();
    let mut config = test_config(&server);
    config.connect_on_start = false;

    let client = Client::spawn(config).unwrap();
    client.publish("lobby", serde_json::json!({"text": "early"}));
    assert_eq!(client.snapshot().await.unwrap().queued, 1);

    client.connect();
    let mut conn = server.accept().await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut conn))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        frame,
        serde_json::json!({"action": "publish", "room": "lobby", "payload": {"text": "early"}})
    );

    // Nothing else follows.
    let extra = tokio::time::timeout(Duration::from_millis(200), read_frame(&mut conn)).await;
    assert!(extra.is_err(), "unexpected frame: {extra:?}");
    assert_eq!(client.snapshot().await.unwrap().queued, 0);
}

// ---------------------------------------------------------------------------
// Test 2: subscribed ack moves the room to confirmed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribe_ack_confirms_room() {
    let server = MockRoomServer::start().await.unwrap();
    let client = Client::spawn(test_config(&server)).unwrap();
    let mut messages = forward(&client, "message");

    let mut conn = server.accept().await.unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    client.subscribe("lobby");
    let frame = read_frame(&mut conn).await.unwrap();
    assert_eq!(
        frame,
        serde_json::json!({"action": "subscribe", "room": "lobby"})
    );

    let snap = client.snapshot().await.unwrap();
    assert_eq!(snap.pending, vec!["lobby"]);
    assert!(snap.confirmed.is_empty());

    send_frame(
        &mut conn,
        serde_json::json!({"action": "subscribed", "room": "lobby"}),
    )
    .await
    .unwrap();

    match next_event(&mut messages).await {
        Event::Message(frame) => assert_eq!(frame.action, "subscribed"),
        other => panic!("expected Message, got {other:?}"),
    }
    let snap = client.snapshot().await.unwrap();
    assert!(snap.pending.is_empty());
    assert_eq!(snap.confirmed, vec!["lobby"]);
}

// ---------------------------------------------------------------------------
// Test 3: server drop triggers reconnect and rooms are replayed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnects_and_resubscribes_after_server_close() {
    let server = MockRoomServer::start().await.unwrap();
    let client = Client::spawn(test_config(&server)).unwrap();
    let mut connects = forward(&client, "connect");
    let mut closes = forward(&client, "close");

    let mut conn = server.accept().await.unwrap();
    assert_eq!(next_event(&mut connects).await, Event::Connect);

    client.subscribe("lobby");
    read_frame(&mut conn).await.unwrap();
    send_frame(
        &mut conn,
        serde_json::json!({"action": "subscribed", "room": "lobby"}),
    )
    .await
    .unwrap();

    conn.close(None).await.unwrap();
    drop(conn);
    assert_eq!(next_event(&mut closes).await, Event::Close);

    let mut conn = tokio::time::timeout(Duration::from_secs(5), server.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next_event(&mut connects).await, Event::Connect);

    let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut conn))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        frame,
        serde_json::json!({"action": "subscribe", "room": "lobby"})
    );

    let snap = client.snapshot().await.unwrap();
    assert_eq!(snap.state, ConnectionState::Connected);
    assert_eq!(snap.pending, vec!["lobby"]);
    assert!(snap.confirmed.is_empty());
    assert_eq!(snap.reconnect_attempts, 0);
}

// ---------------------------------------------------------------------------
// Test 4: business handlers receive the frame
// ---------------------------------------------------------------------------

#[tokio::test]
async fn business_handler_receives_payload() {
    let server = MockRoomServer::start().await.unwrap();
    let mut config = test_config(&server);
    config.connect_on_start = false;

    let client = Client::spawn(config).unwrap();
    let mut chats = forward(&client, "chat");
    client.connect();

    let mut conn = server.accept().await.unwrap();
    send_frame(
        &mut conn,
        serde_json::json!({"action": "chat", "room": "lobby", "payload": {"text": "hi"}}),
    )
    .await
    .unwrap();

    match next_event(&mut chats).await {
        Event::Message(frame) => {
            assert_eq!(frame.room.as_deref(), Some("lobby"));
            assert_eq!(frame.payload, Some(serde_json::json!({"text": "hi"})));
        }
        other => panic!("expected Message, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test 5: undecodable frames are dropped without dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_frame_is_dropped() {
    let server = MockRoomServer::start().await.unwrap();
    let mut config = test_config(&server);
    config.connect_on_start = false;

    let client = Client::spawn(config).unwrap();
    let mut messages = forward(&client, "message");
    client.connect();

    let mut conn = server.accept().await.unwrap();
    conn.send(tungstenite::Message::Text("not json at all".into()))
        .await
        .unwrap();
    send_frame(&mut conn, serde_json::json!({"action": "chat"}))
        .await
        .unwrap();

    // The first message handlers see is the valid one.
    match next_event(&mut messages).await {
        Event::Message(frame) => assert_eq!(frame.action, "chat"),
        other => panic!("expected Message, got {other:?}"),
    }
    assert!(client.connected());
}

// ---------------------------------------------------------------------------
// Test 6: keepalive pings while connected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn keepalive_sends_ping() {
    let server = MockRoomServer::start().await.unwrap();
    let mut config = test_config(&server);
    config.keepalive_interval = Duration::from_millis(50);

    let _client = Client::spawn(config).unwrap();
    let mut conn = server.accept().await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut conn))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, serde_json::json!({"action": "ping"}));
}

// ---------------------------------------------------------------------------
// Test 7: disconnect never reconnects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_does_not_reconnect() {
    let server = MockRoomServer::start().await.unwrap();
    let client = Client::spawn(test_config(&server)).unwrap();

    let mut conn = server.accept().await.unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    client.disconnect();
    wait_for_state(&client, ConnectionState::Closed).await;
    assert!(read_frame(&mut conn).await.is_err());

    let again = tokio::time::timeout(Duration::from_millis(300), server.accept()).await;
    assert!(again.is_err(), "client reconnected after disconnect");
    assert_eq!(client.state(), ConnectionState::Closed);
}

// ---------------------------------------------------------------------------
// Test 8: reconnect disabled at runtime
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_disabled_stays_closed() {
    let server = MockRoomServer::start().await.unwrap();
    let client = Client::spawn(test_config(&server)).unwrap();

    let mut conn = server.accept().await.unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;
    client.set_reconnect_enabled(false);

    conn.close(None).await.unwrap();
    drop(conn);
    wait_for_state(&client, ConnectionState::Closed).await;

    let again = tokio::time::timeout(Duration::from_millis(300), server.accept()).await;
    assert!(again.is_err(), "client reconnected while disabled");
    assert_eq!(client.snapshot().await.unwrap().reconnect_attempts, 1);
}

// ---------------------------------------------------------------------------
// Test 9: cleanup closes the socket and stops the session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_stops_session() {
    let server = MockRoomServer::start().await.unwrap();
    let client = Client::spawn(test_config(&server)).unwrap();
    let observer = client.watch_state();

    let mut conn = server.accept().await.unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    tokio::time::timeout(Duration::from_secs(5), client.cleanup())
        .await
        .unwrap();
    assert_eq!(*observer.borrow(), ConnectionState::Closed);
    assert!(read_frame(&mut conn).await.is_err());

    let again = tokio::time::timeout(Duration::from_millis(300), server.accept()).await;
    assert!(again.is_err(), "client reconnected after cleanup");
}
