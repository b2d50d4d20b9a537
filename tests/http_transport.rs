//! reqwest transport against a raw HTTP backend.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use contract_client::config::TransportConfig;
use contract_client::transport::endpoints;
use contract_client::{
    CallOrchestrator, ClientError, ContractCall, HttpTransport, LocalWallet, Transport, TransportRequest,
};

mod common;
use common::{start_http_backend, test_config, RawRequest, RawResponse};

const ANVIL_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const ANVIL_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

fn transport_for(addr: std::net::SocketAddr) -> HttpTransport {
    HttpTransport::new(&TransportConfig {
        base_url: format!("http://{}", addr),
        user_agent: "contract-client-tests".to_string(),
    })
    .unwrap()
}

#[tokio::test]
async fn test_request_and_response_mapping() {
    let seen = Arc::new(Mutex::new(Vec::<RawRequest>::new()));
    let sink = seen.clone();
    let addr = start_http_backend(move |request| {
        sink.lock().push(request);
        RawResponse::json(429, json!({ "error": "slow down" }))
            .with_header("Retry-After", "3")
            .with_header("ETag", "\"abc\"")
    })
    .await;

    let transport = transport_for(addr);
    let response = transport
        .send(
            TransportRequest::post("/contracts/game/call", json!({ "operation": "move" }))
                .with_header("Authorization", "Bearer t"),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 429);
    assert_eq!(response.retry_after_ms(), Some(3_000));
    assert_eq!(response.etag(), Some("\"abc\""));
    assert_eq!(response.body["error"], "slow down");

    let seen = seen.lock();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/contracts/game/call");
    assert_eq!(seen[0].headers["authorization"], "Bearer t");
    assert_eq!(seen[0].headers["user-agent"], "contract-client-tests");
    let body: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(body["operation"], "move");
}

#[tokio::test]
async fn test_non_json_and_empty_bodies() {
    let addr = start_http_backend(|request| {
        if request.path.ends_with("empty") {
            RawResponse { status: 304, headers: vec![], body: String::new() }
        } else {
            RawResponse { status: 200, headers: vec![], body: "plain text".to_string() }
        }
    })
    .await;
    let transport = transport_for(addr);

    let text = transport.send(TransportRequest::get("/content/text")).await.unwrap();
    assert_eq!(text.body, Value::String("plain text".to_string()));

    let empty = transport.send(TransportRequest::get("/content/empty")).await.unwrap();
    assert!(empty.is_not_modified());
    assert_eq!(empty.body, Value::Null);
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = transport_for(addr)
        .send(TransportRequest::get("/content/x"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Network(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_end_to_end_signed_session() {
    let verified = Arc::new(Mutex::new(None::<Value>));
    let sink = verified.clone();
    let addr = start_http_backend(move |request| match request.path.as_str() {
        endpoints::AUTH_CHALLENGE => RawResponse::json(200, json!({ "challenge": "sign-me-7" })),
        endpoints::AUTH_VERIFY => {
            *sink.lock() = serde_json::from_str(&request.body).ok();
            RawResponse::json(200, json!({ "token": "live-token", "expires_at": 4_102_444_800_000u64 }))
        }
        "/contracts/game/call" => {
            if request.headers.get("authorization").map(String::as_str) == Some("Bearer live-token") {
                RawResponse::json(200, json!({ "result": "moved" }))
            } else {
                RawResponse::json(401, json!({ "error": "missing token" }))
            }
        }
        _ => RawResponse::json(404, json!({ "error": "not found" })),
    })
    .await;

    let wallet = LocalWallet::from_private_key(ANVIL_KEY, 1).unwrap();
    let client = CallOrchestrator::new(
        test_config(),
        Arc::new(transport_for(addr)),
        Some(Arc::new(wallet)),
    )
    .unwrap();

    let value = client
        .call_contract(ContractCall::new("game", "move", json!({ "to": "e4" })))
        .await
        .unwrap();
    assert_eq!(value["result"], "moved");

    let verify = verified.lock().clone().unwrap();
    assert_eq!(verify["address"], ANVIL_ADDRESS);
    assert_eq!(verify["challenge"], "sign-me-7");
    let signature = verify["signature"].as_str().unwrap();
    assert!(signature.starts_with("0x"));
    assert_eq!(signature.len(), 2 + 65 * 2);

    assert_eq!(client.status().session.expires_at_ms, Some(4_102_444_800_000));

    let missing = client
        .call_contract(ContractCall::new("ghost", "noop", json!(null)))
        .await
        .unwrap_err();
    assert!(matches!(missing, ClientError::ContractCall { status: 404, .. }));
    client.destroy().await;
}
