use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Once;

use axum::extract::{Path, Query};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bclient_core::http::{HttpExecutor, Method, ResourcePath};
use bclient_core::{BlockId, ClientConfig, ClientError, Network, NodeClient, WalletClient};
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

// =============================================================================
// Fake node / wallet service
// =============================================================================

async fn block(Path(id): Path<String>) -> impl IntoResponse {
    if id == "0" {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "block not found" })));
    }
    (StatusCode::OK, Json(json!({ "id": id, "txs": [] })))
}

async fn fee(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let blocks: u64 = query
        .get("blocks")
        .and_then(|b| b.parse().ok())
        .unwrap_or(1);
    Json(json!({ "rate": blocks * 1000 }))
}

async fn echo_auth(headers: HeaderMap) -> Json<Value> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    Json(json!({ "authorization": auth }))
}

async fn rpc(Json(body): Json<Value>) -> impl IntoResponse {
    match body["method"].as_str() {
        Some("getblockcount") => (
            StatusCode::OK,
            Json(json!({ "result": 7, "error": null, "id": null })),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "result": null,
                "error": { "code": -32601, "message": "Method not found." },
                "id": null
            })),
        ),
    }
}

async fn broadcast(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "success": body["tx"].is_string() }))
}

async fn wallet_balance(
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if query.get("token").map(String::as_str) != Some("wallet-token") {
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "bad token" })));
    }
    let confirmed = if query.get("account").map(String::as_str) == Some("savings") {
        500
    } else {
        1500
    };
    (
        StatusCode::OK,
        Json(json!({ "wallet": id, "confirmed": confirmed, "unconfirmed": 20, "tx": 3, "coin": 2 })),
    )
}

async fn wallet_history(Path(id): Path<String>) -> Json<Value> {
    Json(json!([{ "wallet": id }]))
}

async fn wallet_send(Path(_id): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

async fn boom() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "kaboom")
}

async fn empty() -> StatusCode {
    StatusCode::OK
}

async fn spawn_service() -> SocketAddr {
    let app = Router::new()
        .route("/", post(rpc))
        .route("/block/{id}", get(block))
        .route("/fee", get(fee))
        .route("/auth", get(echo_auth))
        .route("/broadcast", post(broadcast))
        .route("/boom", get(boom))
        .route("/empty", get(empty))
        .route("/wallet/{id}/balance", get(wallet_balance))
        .route("/wallet/{id}/tx/history", get(wallet_history))
        .route("/wallet/{id}/send", post(wallet_send));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port must bind");
    let addr = listener.local_addr().expect("listener must have an address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake service must run");
    });
    addr
}

fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig::node(Network::Regtest)
        .with_host("127.0.0.1")
        .with_port(addr.port())
}

// =============================================================================
// Executor
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn missing_block_is_not_found_not_an_error() {
    init_tracing();
    let addr = spawn_service().await;
    let node = NodeClient::new(config_for(addr)).expect("client must construct");

    let missing = node
        .get_block(BlockId::Height(0))
        .await
        .expect("404 must not be an error");
    assert!(missing.is_none());

    let found = node
        .get_block(BlockId::Height(5))
        .await
        .expect("block must load")
        .expect("block 5 exists");
    assert_eq!(found["id"], "5");
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_carries_status_and_body() {
    init_tracing();
    let addr = spawn_service().await;
    let http = HttpExecutor::new(&config_for(addr)).expect("executor must construct");
    let path = ResourcePath::new("/boom", &[]).expect("valid template");

    match http.get::<Value>(&path, None).await {
        Err(ClientError::RequestFailed { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "kaboom");
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn api_key_is_sent_as_basic_auth() {
    init_tracing();
    let addr = spawn_service().await;
    let config = config_for(addr).with_api_key("hunter2");
    let http = HttpExecutor::new(&config).expect("executor must construct");
    let path = ResourcePath::new("/auth", &[]).expect("valid template");

    let echoed: Value = http
        .request(Method::GET, &path, None)
        .await
        .expect("request must succeed")
        .expect("route exists");
    // base64("hunter2:")
    assert_eq!(echoed["authorization"], "Basic aHVudGVyMjo=");
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_success_body_decodes_as_null() {
    init_tracing();
    let addr = spawn_service().await;
    let http = HttpExecutor::new(&config_for(addr)).expect("executor must construct");
    let path = ResourcePath::new("/empty", &[]).expect("valid template");

    let value: Option<Value> = http.get(&path, None).await.expect("empty 200 must decode");
    assert_eq!(value, Some(Value::Null));
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connection_is_a_transport_error() {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port must bind");
    let addr = listener.local_addr().expect("listener must have an address");
    drop(listener);

    let node = NodeClient::new(config_for(addr)).expect("client must construct");
    let err = node.get_info().await.expect_err("nothing is listening");
    assert!(matches!(err, ClientError::Transport(_)), "got {err:?}");
    assert!(err.is_connection_error());
}

// =============================================================================
// Node facade
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn fee_estimate_sends_query_params() {
    init_tracing();
    let addr = spawn_service().await;
    let node = NodeClient::new(config_for(addr)).expect("client must construct");

    let fee = node
        .estimate_fee(6)
        .await
        .expect("fee must load")
        .expect("fee route exists");
    assert_eq!(fee.rate, 6000);
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_posts_json_body() {
    init_tracing();
    let addr = spawn_service().await;
    let node = NodeClient::new(config_for(addr)).expect("client must construct");

    let reply = node
        .broadcast("0200000000")
        .await
        .expect("broadcast must succeed")
        .expect("route exists");
    assert_eq!(reply["success"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn execute_maps_rpc_results_and_errors() {
    init_tracing();
    let addr = spawn_service().await;
    let node = NodeClient::new(config_for(addr)).expect("client must construct");

    let count = node
        .execute("getblockcount", Vec::new())
        .await
        .expect("rpc must succeed");
    assert_eq!(count, json!(7));

    match node.execute("nosuchmethod", Vec::new()).await {
        Err(ClientError::Remote { message }) => assert_eq!(message, "Method not found."),
        other => panic!("expected remote error, got {other:?}"),
    }
}

// =============================================================================
// Wallet facade
// =============================================================================

fn wallet_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig::wallet(Network::Regtest)
        .with_host("127.0.0.1")
        .with_port(addr.port())
        .with_token("wallet-token")
}

#[tokio::test(flavor = "multi_thread")]
async fn wallet_requests_carry_token_and_account() {
    init_tracing();
    let addr = spawn_service().await;
    let wallet = WalletClient::new(wallet_config(addr), "primary").expect("client must construct");

    let total = wallet
        .get_balance(None)
        .await
        .expect("balance must load")
        .expect("wallet exists");
    assert_eq!(total.confirmed, 1500);
    assert_eq!(total.coin, 2);

    let savings = wallet
        .get_balance(Some("savings"))
        .await
        .expect("balance must load")
        .expect("wallet exists");
    assert_eq!(savings.confirmed, 500);
}

#[tokio::test(flavor = "multi_thread")]
async fn wallet_without_token_is_rejected() {
    init_tracing();
    let addr = spawn_service().await;
    let config = ClientConfig::wallet(Network::Regtest)
        .with_host("127.0.0.1")
        .with_port(addr.port());
    let wallet = WalletClient::new(config, "primary").expect("client must construct");

    let err = wallet.get_balance(None).await.expect_err("missing token must fail");
    assert!(matches!(err, ClientError::RequestFailed { status: 403, .. }), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn wallet_id_stays_inside_its_path_slot() {
    init_tracing();
    let addr = spawn_service().await;
    let wallet = WalletClient::new(wallet_config(addr), "a/b").expect("client must construct");

    let history = wallet
        .get_history(None)
        .await
        .expect("history must load")
        .expect("route must match with the escaped id");
    assert_eq!(history[0]["wallet"], "a/b");

    // A dot-segment id would collapse into the parent route.
    let escaping = WalletClient::new(wallet_config(addr), "..").expect("client must construct");
    let err = escaping
        .get_balance(None)
        .await
        .expect_err("dot-segment id must be refused");
    assert!(matches!(err, ClientError::InvalidRequest(_)), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn wallet_send_merges_token_into_options() {
    init_tracing();
    let addr = spawn_service().await;
    let wallet = WalletClient::new(wallet_config(addr), "primary").expect("client must construct");

    let echoed = wallet
        .send(json!({ "outputs": [{ "address": "bcrt1q", "value": 1000 }], "rate": 1000 }))
        .await
        .expect("send must succeed")
        .expect("route exists");
    assert_eq!(echoed["token"], "wallet-token");
    assert_eq!(echoed["rate"], 1000);

    assert!(matches!(
        wallet.send(json!(["not", "an", "object"])).await,
        Err(ClientError::InvalidRequest(_))
    ));
}
