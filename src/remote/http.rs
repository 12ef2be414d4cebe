//! HTTP transport over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::error::{Result, SyncError};
use crate::remote::{classify::is_network_message, Method, RemoteRequest, RemoteResponse, Transport};

/// Header carrying the signature of a write.
pub const SIGNATURE_HEADER: &str = "x-chat-signature";

/// Sends requests to `{endpoint}/{path}` with JSON bodies.
///
/// Response bodies are JSON; an `"error"` string field marks a failure even
/// on a 2xx status.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `timeout` is the client-level ceiling; the retry policy races its own.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transient(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout(Duration::ZERO)
    } else if err.is_connect() || err.is_request() || is_network_message(&err.to_string()) {
        SyncError::Transient(err.to_string())
    } else if err.is_decode() {
        SyncError::Parse(err.to_string())
    } else {
        SyncError::Remote {
            status: err.status().map(|s| s.as_u16()).unwrap_or(0),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse> {
        let url = format!(
            "{}/{}",
            request.endpoint.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(signature) = &request.signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        trace!(%url, status, bytes = bytes.len(), "http response");

        if bytes.is_empty() {
            return Ok(RemoteResponse {
                status,
                payload: None,
                error: None,
            });
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(payload) => {
                let error = payload
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(RemoteResponse {
                    status,
                    payload: Some(payload),
                    error,
                })
            }
            Err(e) if (200..300).contains(&status) => Err(SyncError::Parse(e.to_string())),
            Err(_) => Ok(RemoteResponse {
                status,
                payload: None,
                error: Some(String::from_utf8_lossy(&bytes).into_owned()),
            }),
        }
    }
}
