//! Upstream HTTP transport.
//!
//! The executor talks to the upstream through [`HttpTransport`] so tests can
//! swap the wire for a scripted double. [`ReqwestTransport`] is the real
//! implementation; each attempt is bound to the per-attempt deadline and
//! aborted when it elapses.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// One rendered upstream call.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Uppercase HTTP verb.
    pub method: String,
    /// Fully qualified URL, query string included.
    pub url: String,
    /// Extra headers (accept, authorization).
    pub headers: Vec<(String, String)>,
    /// JSON body for bodied calls.
    pub body: Option<Value>,
    /// Per-attempt deadline in milliseconds.
    pub timeout_ms: u64,
}

/// What came back from one attempt, before parsing and cleaning.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    /// Response headers with lowercased names, in arrival order.
    pub headers: Vec<(String, String)>,
    pub body_text: String,
}

/// Transport-level failures; everything else is a status on the response.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The per-attempt deadline elapsed and the request was aborted.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// Connection failure, DNS failure, broken body stream.
    #[error("network error: {reason}")]
    Network { reason: String },
}

/// Capability to put one request on the wire.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// Production transport over a shared `reqwest` client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hiro/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build upstream HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            TransportError::Network {
                reason: format!("invalid HTTP method '{}'", request.method),
            }
        })?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let deadline = Duration::from_millis(request.timeout_ms);
        let attempt = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body_text = response.text().await?;
            Ok::<_, reqwest::Error>(UpstreamResponse {
                status,
                headers,
                body_text,
            })
        };

        match tokio::time::timeout(deadline, attempt).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(TransportError::Network {
                reason: err.to_string(),
            }),
            Err(_) => Err(TransportError::Timeout {
                timeout_ms: request.timeout_ms,
            }),
        }
    }
}
