//! Shared utilities for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use contract_client::config::{BackoffStrategy, ClientConfig, RetryConfig};
use contract_client::transport::endpoints;
use contract_client::{ClientResult, Transport, TransportRequest, TransportResponse, WalletProvider};

/// Fast, deterministic settings for orchestrator tests.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.retry = RetryConfig {
        strategy: BackoffStrategy::Exponential,
        max_retries: 2,
        base_delay_ms: 10,
        max_delay_ms: 100,
        jitter: false,
    };
    config.rate_limit.queue_processing_interval_ms = 10;
    config.session.expiry_check_interval_ms = 0;
    config
}

type Handler = dyn Fn(&TransportRequest, u32) -> ClientResult<TransportResponse> + Send + Sync;

/// Scripted transport. Auth endpoints answer automatically; everything else
/// goes to the handler with the number of earlier calls to that endpoint.
pub struct MockTransport {
    handler: Box<Handler>,
    calls: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<TransportRequest>>,
    tokens_issued: AtomicU32,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&TransportRequest, u32) -> ClientResult<TransportResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            tokens_issued: AtomicU32::new(0),
        })
    }

    /// Always answers 200 with `body`.
    pub fn ok(body: Value) -> Arc<Self> {
        Self::new(move |_, _| Ok(TransportResponse::new(200, body.clone())))
    }

    pub fn calls(&self, endpoint: &str) -> u32 {
        self.calls.lock().get(endpoint).copied().unwrap_or(0)
    }

    /// Endpoints in the order they reached the transport.
    pub fn sent_endpoints(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.endpoint.clone()).collect()
    }

    pub fn requests_to(&self, endpoint: &str) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> ClientResult<TransportResponse> {
        let n = {
            let mut calls = self.calls.lock();
            let count = calls.entry(request.endpoint.clone()).or_insert(0);
            *count += 1;
            *count - 1
        };
        self.requests.lock().push(request.clone());

        match request.endpoint.as_str() {
            endpoints::AUTH_CHALLENGE => Ok(TransportResponse::new(200, json!({ "challenge": format!("nonce-{n}") }))),
            endpoints::AUTH_VERIFY => {
                let token = self.tokens_issued.fetch_add(1, Ordering::SeqCst);
                Ok(TransportResponse::new(200, json!({ "token": format!("token-{token}") })))
            }
            _ => (self.handler)(&request, n),
        }
    }
}

#[derive(Debug)]
pub struct MockWallet;

#[async_trait]
impl WalletProvider for MockWallet {
    fn public_address(&self) -> String {
        "0x1111111111111111111111111111111111111111".to_string()
    }

    async fn sign_message(&self, challenge: &[u8]) -> ClientResult<String> {
        Ok(format!("0x{}", challenge.len()))
    }
}

pub fn wallet() -> Option<Arc<dyn WalletProvider>> {
    Some(Arc::new(MockWallet))
}

/// Request as seen by the raw backend.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RawResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Start a programmable HTTP/1.1 backend on an ephemeral port.
pub async fn start_http_backend<F>(handler: F) -> SocketAddr
where
    F: Fn(RawRequest) -> RawResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let (read_half, mut write_half) = socket.into_split();
                        let mut reader = BufReader::new(read_half);
                        let Some(request) = read_request(&mut reader).await else {
                            return;
                        };

                        let response = handler(request);
                        let mut raw = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                            response.status,
                            reason(response.status),
                            response.body.len()
                        );
                        for (name, value) in &response.headers {
                            raw.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        raw.push_str("\r\n");
                        raw.push_str(&response.body);

                        let _ = write_half.write_all(raw.as_bytes()).await;
                        let _ = write_half.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request<R: tokio::io::AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Option<RawRequest> {
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).await.ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.ok()?;

    Some(RawRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
