//! End-to-end tests over a real listener and WebSocket clients.

use counter_server::app::{self, ServerHandle};
use counter_server::config::Config;
use counter_server::shutdown::{ShutdownCause, ShutdownTrigger};
use counter_server::store::{MemoryStore, COUNTER_KEY, VISITORS_KEY};
use counter_types::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.bind_address = "127.0.0.1:0".to_string();
    config.store.op_timeout_ms = 500;
    config
}

async fn start_server(config: Config, store: Arc<MemoryStore>) -> ServerHandle {
    app::start(config, store, ShutdownTrigger::new())
        .await
        .expect("server starts")
}

async fn connect(handle: &ServerHandle) -> Client {
    let url = format!("ws://{}/socket", handle.local_addr());
    let (ws, _response) = connect_async(url).await.expect("websocket handshake");
    ws
}

async fn send(ws: &mut Client, event: ClientEvent) {
    ws.send(Message::Text(event.to_json().unwrap()))
        .await
        .unwrap();
}

/// Next server event, skipping control frames.
async fn next_event(ws: &mut Client) -> ServerEvent {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("event within deadline")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = frame {
            return ServerEvent::from_json(&text).unwrap();
        }
    }
}

async fn assert_quiet(ws: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {:?}", next);
}

#[tokio::test]
async fn two_clients_share_one_counter() {
    let store = Arc::new(MemoryStore::new());
    let handle = start_server(test_config(), store.clone()).await;

    let mut a = connect(&handle).await;
    assert_eq!(next_event(&mut a).await, ServerEvent::UpdateCounter(0));
    assert_eq!(next_event(&mut a).await, ServerEvent::UpdateTotalVisitors(0));

    send(&mut a, ClientEvent::Increment).await;
    assert_eq!(next_event(&mut a).await, ServerEvent::UpdateCounter(1));
    assert_eq!(next_event(&mut a).await, ServerEvent::UpdateTotalVisitors(1));

    let mut b = connect(&handle).await;
    assert_eq!(next_event(&mut b).await, ServerEvent::UpdateCounter(1));
    assert_eq!(next_event(&mut b).await, ServerEvent::UpdateTotalVisitors(1));

    send(&mut a, ClientEvent::Decrement).await;
    assert_eq!(next_event(&mut a).await, ServerEvent::UpdateCounter(0));
    assert_eq!(next_event(&mut b).await, ServerEvent::UpdateCounter(0));
    assert_quiet(&mut a).await;
    assert_quiet(&mut b).await;

    let report = handle.shutdown(ShutdownCause::Signal("SIGTERM")).await;
    assert_eq!(report.exit_code(), 0);
    assert_eq!(store.peek(COUNTER_KEY).as_deref(), Some("0"));
    assert_eq!(store.peek(VISITORS_KEY).as_deref(), Some("1"));
}

#[tokio::test]
async fn restart_resumes_from_store() {
    let store = Arc::new(MemoryStore::with_values([
        (COUNTER_KEY, "41"),
        (VISITORS_KEY, "7"),
    ]));
    let handle = start_server(test_config(), store).await;

    let mut a = connect(&handle).await;
    assert_eq!(next_event(&mut a).await, ServerEvent::UpdateCounter(41));
    assert_eq!(next_event(&mut a).await, ServerEvent::UpdateTotalVisitors(7));

    handle.shutdown(ShutdownCause::Signal("SIGINT")).await;
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let handle = start_server(test_config(), Arc::new(MemoryStore::new())).await;
    let mut a = connect(&handle).await;
    next_event(&mut a).await;
    next_event(&mut a).await;

    a.send(Message::Text("not json".to_string())).await.unwrap();
    a.send(Message::Text(r#"{"event":"reset"}"#.to_string()))
        .await
        .unwrap();
    send(&mut a, ClientEvent::Decrement).await;

    assert_eq!(next_event(&mut a).await, ServerEvent::UpdateCounter(-1));
    handle.shutdown(ShutdownCause::Signal("SIGINT")).await;
}

#[tokio::test]
async fn upgrade_refused_at_capacity() {
    let mut config = test_config();
    config.limits.max_connections = 1;
    let handle = start_server(config, Arc::new(MemoryStore::new())).await;

    let mut a = connect(&handle).await;
    // Registered once the first event arrives.
    next_event(&mut a).await;

    let url = format!("ws://{}/socket", handle.local_addr());
    match connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 503),
        other => panic!("expected HTTP 503, got {:?}", other.map(|_| ())),
    }

    handle.shutdown(ShutdownCause::Signal("SIGINT")).await;
}

#[tokio::test]
async fn shutdown_flushes_and_closes_clients() {
    let store = Arc::new(MemoryStore::new());
    let handle = start_server(test_config(), store.clone()).await;

    let mut a = connect(&handle).await;
    next_event(&mut a).await;
    next_event(&mut a).await;
    send(&mut a, ClientEvent::Increment).await;
    assert_eq!(next_event(&mut a).await, ServerEvent::UpdateCounter(1));

    let report = handle.shutdown(ShutdownCause::Signal("SIGTERM")).await;
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.clients_closed, 1);
    assert!(store.is_closed());
    assert_eq!(store.peek(COUNTER_KEY).as_deref(), Some("1"));

    // The socket ends with a close frame or EOF; no further counter events.
    loop {
        match tokio::time::timeout(WAIT, a.next()).await.expect("closed in time") {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(Message::Text(text))) => {
                let event = ServerEvent::from_json(&text).unwrap();
                assert!(matches!(event, ServerEvent::UpdateTotalVisitors(_)));
            }
            Some(Ok(_)) => {}
        }
    }
}

#[tokio::test]
async fn explicit_disconnect_closes_session() {
    let handle = start_server(test_config(), Arc::new(MemoryStore::new())).await;
    let mut a = connect(&handle).await;
    next_event(&mut a).await;

    send(&mut a, ClientEvent::Disconnect).await;

    let deadline = tokio::time::Instant::now() + WAIT;
    while handle.service().registry().count() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "client still registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown(ShutdownCause::Signal("SIGINT")).await;
}
