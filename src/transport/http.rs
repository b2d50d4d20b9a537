//! reqwest-backed transport.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

use crate::config::TransportConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{Method, Transport, TransportRequest, TransportResponse};

/// HTTP transport rooted at a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> ClientResult<Self> {
        let base_url: Url = config.base_url.parse().map_err(|e| {
            ClientError::Config(format!("Invalid base URL '{}': {}", config.base_url, e))
        })?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    fn url_for(&self, endpoint: &str) -> ClientResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let raw = format!("{}/{}", base, endpoint.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| ClientError::Config(format!("Invalid endpoint '{}': {}", endpoint, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> ClientResult<TransportResponse> {
        let url = self.url_for(&request.endpoint)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        tracing::trace!(endpoint = %request.endpoint, status, "Transport response");

        Ok(TransportResponse { status, body, headers })
    }
}
