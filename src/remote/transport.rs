//! Wire-level request/response types and the transport seam.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// HTTP-like method of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Method {
    Get,
    Post,
}

/// Opaque signing capability supplied by the identity collaborator.
pub trait Signer: Send + Sync {
    /// Produces the signature attached to a write addressed to `path`.
    fn sign(&self, path: &str, body: &[u8]) -> String;
}

/// How a logical remote call should be issued.
#[derive(Clone)]
pub struct CallOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub needs_signer: bool,
    pub signer: Option<Arc<dyn Signer>>,
}

impl CallOptions {
    /// Unsigned read.
    pub fn get() -> Self {
        Self {
            method: Method::Get,
            body: None,
            needs_signer: false,
            signer: None,
        }
    }

    /// Unsigned POST, used for bulk reads.
    pub fn post(body: Value) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            needs_signer: false,
            signer: None,
        }
    }

    /// Signed write. Fails without a network call if `signer` is `None`.
    pub fn write(body: Value, signer: Option<Arc<dyn Signer>>) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            needs_signer: true,
            signer,
        }
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("method", &self.method)
            .field("body", &self.body)
            .field("needs_signer", &self.needs_signer)
            .field("has_signer", &self.signer.is_some())
            .finish()
    }
}

/// One attempt against one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    /// Base URL of the endpoint this attempt targets
    pub endpoint: String,
    /// `{entity_id}/{operation}`
    pub path: String,
    pub method: Method,
    pub body: Option<Value>,
    pub signature: Option<String>,
}

/// Raw response of the remote service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteResponse {
    pub status: u16,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

impl RemoteResponse {
    pub fn ok(payload: Value) -> Self {
        Self {
            status: 200,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            payload: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.error.is_none()
    }
}

/// Sends a single attempt. Connection-level failures come back as
/// [`crate::SyncError::Transient`] or [`crate::SyncError::Timeout`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse>;
}
