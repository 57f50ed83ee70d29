use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bclient_core::{BlockId, ClientConfig, ClientError, ConnectionState, Network, NodeClient};
use serde_json::{json, Value};

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bclient_core=debug")),
            )
            .with_target(true)
            .with_test_writer()
            .try_init();
    });
}

const API_KEY: &str = "socket-secret";
const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Fake socket server
// =============================================================================

async fn upgrade(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(serve_socket)
}

async fn send_json(socket: &mut WebSocket, frame: Value) -> bool {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .is_ok()
}

async fn serve_socket(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = serde_json::from_str(text.as_str()).expect("client frames are JSON");
        let id = frame["id"].clone();
        let reply = match frame["method"].as_str() {
            Some("auth") if frame["params"] == json!([API_KEY]) => json!({ "id": id, "result": true }),
            Some("auth") => json!({ "id": id, "error": { "message": "invalid api key" } }),
            Some("get tip") => json!({ "id": id, "result": { "height": 101 } }),
            Some("get entry") => json!({ "id": id, "result": { "height": frame["params"][0] } }),
            Some("watch chain") => json!({ "id": id, "result": null }),
            Some(other) => json!({ "id": id, "error": format!("unknown method {other}") }),
            // Membership frames get no reply.
            None => continue,
        };
        if !send_json(&mut socket, reply).await {
            return;
        }
        if frame["method"] == "watch chain" {
            let event = json!({ "event": "block connect", "args": [{ "height": 102 }] });
            if !send_json(&mut socket, event).await {
                return;
            }
        }
    }
}

async fn spawn_socket_server() -> SocketAddr {
    let app = Router::new().route("/", get(upgrade));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port must bind");
    let addr = listener.local_addr().expect("listener must have an address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("socket server must run");
    });
    addr
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig::node(Network::Regtest)
        .with_host("127.0.0.1")
        .with_port(addr.port())
        .with_timeout(WAIT)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn websocket_calls_and_events_round_trip() {
    init_tracing();
    let addr = spawn_socket_server().await;
    let node = NodeClient::new(config_for(addr).with_api_key(API_KEY)).expect("client must construct");
    let mut blocks = node.subscribe("block connect");

    node.open().expect("open must succeed");
    node.wait_ready(WAIT).await.expect("channel must become ready");

    let tip = node.get_tip().await.expect("get tip must resolve");
    assert_eq!(tip["height"], 101);

    let entry = node
        .get_entry(BlockId::Height(42))
        .await
        .expect("get entry must resolve");
    assert_eq!(entry["height"], 42);

    node.watch_chain().await.expect("watch chain must succeed");
    let event = tokio::time::timeout(WAIT, blocks.recv())
        .await
        .expect("block event must arrive in time")
        .expect("subscription must stay open");
    assert_eq!(event.args[0]["height"], 102);

    match node.call("no such method", Vec::new()).await {
        Err(ClientError::Remote { message }) => assert!(message.contains("no such method")),
        other => panic!("expected remote error, got {other:?}"),
    }

    node.close().await;
    assert_eq!(node.state(), ConnectionState::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_api_key_surfaces_error_event() {
    init_tracing();
    let addr = spawn_socket_server().await;
    let node = NodeClient::new(config_for(addr).with_api_key("wrong")).expect("client must construct");
    let mut errors = node.subscribe("error");

    node.open().expect("open must succeed");
    let event = tokio::time::timeout(WAIT, errors.recv())
        .await
        .expect("error event must arrive in time")
        .expect("subscription must stay open");
    let message = event.args[0].as_str().expect("error arg must be a string");
    assert!(message.contains("invalid api key"), "unexpected message: {message}");
    assert!(!node.state().is_ready());

    node.close().await;
    assert_eq!(node.state(), ConnectionState::Closed);
}
