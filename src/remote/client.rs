//! Remote client with endpoint failover.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::remote::{interpret, CallOptions, RemoteRequest, RetryPolicy, Transport};

/// Issues logical remote calls over an ordered list of equivalent endpoints.
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
    endpoints: Vec<String>,
    /// Index of the endpoint new attempts target
    current: AtomicUsize,
    policy: RetryPolicy,
}

impl RemoteClient {
    /// An empty endpoint list falls back to a single empty base URL, which
    /// every attempt fails against.
    pub fn new(transport: Arc<dyn Transport>, endpoints: Vec<String>, policy: RetryPolicy) -> Self {
        let endpoints = if endpoints.is_empty() {
            warn!("remote client created without endpoints");
            vec![String::new()]
        } else {
            endpoints
        };

        Self {
            transport,
            endpoints,
            current: AtomicUsize::new(0),
            policy,
        }
    }

    pub fn current_endpoint(&self) -> &str {
        let index = self.current.load(Ordering::SeqCst) % self.endpoints.len();
        &self.endpoints[index]
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Advances to the next endpoint, wrapping around.
    fn switch_endpoint(&self, cause: &SyncError) {
        let len = self.endpoints.len();
        let previous = self.current.fetch_add(1, Ordering::SeqCst) % len;
        let next = (previous + 1) % len;
        if len > 1 {
            info!(
                from = %self.endpoints[previous],
                to = %self.endpoints[next],
                error = %cause,
                "switching remote endpoint"
            );
        }
    }

    /// Performs one logical call to `path` (`{entity_id}/{operation}`).
    pub async fn call(&self, path: &str, options: CallOptions) -> Result<Value> {
        let signature = if options.needs_signer {
            let signer = options
                .signer
                .as_ref()
                .ok_or_else(|| SyncError::MissingSigner(path.to_string()))?;
            let body = options
                .body
                .as_ref()
                .map(serde_json::to_vec)
                .transpose()?
                .unwrap_or_default();
            Some(signer.sign(path, &body))
        } else {
            None
        };

        debug!(path, method = ?options.method, "remote call");

        self.policy
            .run(
                || {
                    let request = RemoteRequest {
                        endpoint: self.current_endpoint().to_string(),
                        path: path.to_string(),
                        method: options.method,
                        body: options.body.clone(),
                        signature: signature.clone(),
                    };
                    async move { interpret(self.transport.send(request).await?) }
                },
                |err| self.switch_endpoint(err),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Method, Reply, ScriptedTransport, Signer};
    use serde_json::json;
    use std::time::Duration;

    struct FixedSigner;

    impl Signer for FixedSigner {
        fn sign(&self, path: &str, _body: &[u8]) -> String {
            format!("sig:{path}")
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> RemoteClient {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            factor: 1.5,
            call_timeout: Duration::from_secs(10),
        };
        RemoteClient::new(
            transport,
            vec!["http://primary".to_string(), "http://secondary".to_string()],
            policy,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_returns_payload() {
        let transport = ScriptedTransport::new();
        transport.set("s1/community", Reply::json(json!({"id": "s1"})));
        let client = client(transport.clone());

        let value = client.call("s1/community", CallOptions::get()).await.unwrap();
        assert_eq!(value["id"], "s1");

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, Method::Get);
        assert_eq!(calls[0].endpoint, "http://primary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_switches_endpoint_once() {
        let transport = ScriptedTransport::new();
        transport.push("s1/members", Reply::status(503, "service unavailable"));
        transport.push("s1/members", Reply::status(503, "service unavailable"));
        transport.push("s1/members", Reply::json(json!([])));
        let client = client(transport.clone());

        client.call("s1/members", CallOptions::get()).await.unwrap();

        let endpoints: Vec<String> = transport.calls().into_iter().map(|c| c.endpoint).collect();
        assert_eq!(
            endpoints,
            vec!["http://primary", "http://secondary", "http://secondary"]
        );
        assert_eq!(client.current_endpoint(), "http://secondary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_wraps_around() {
        let transport = ScriptedTransport::new();
        transport.push("a/profile", Reply::fail(SyncError::Transient("reset".into())));
        transport.push("b/profile", Reply::fail(SyncError::Transient("reset".into())));
        transport.set("a/profile", Reply::json(json!({})));
        transport.set("b/profile", Reply::json(json!({})));
        let client = client(transport.clone());

        client.call("a/profile", CallOptions::get()).await.unwrap();
        client.call("b/profile", CallOptions::get()).await.unwrap();

        assert_eq!(client.current_endpoint(), "http://primary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_response_is_not_retried() {
        let transport = ScriptedTransport::new();
        transport.set("gone/community", Reply::status(404, "community not found"));
        let client = client(transport.clone());

        let err = client.call("gone/community", CallOptions::get()).await.unwrap_err();
        assert!(matches!(err, SyncError::Fatal(_)));
        assert_eq!(transport.call_count("gone/community"), 1);
        assert_eq!(client.current_endpoint(), "http://primary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_without_signer_fails_locally() {
        let transport = ScriptedTransport::new();
        let client = client(transport.clone());

        let err = client
            .call("s1/channels/reorder", CallOptions::write(json!({}), None))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingSigner(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_carries_signature() {
        let transport = ScriptedTransport::new();
        transport.set("s1/channels/reorder", Reply::json(json!({"ok": true})));
        let client = client(transport.clone());
        let signer: Arc<dyn Signer> = Arc::new(FixedSigner);

        client
            .call(
                "s1/channels/reorder",
                CallOptions::write(json!({"id": "c1"}), Some(signer)),
            )
            .await
            .unwrap();

        let calls = transport.calls();
        assert_eq!(calls[0].method, Method::Post);
        assert_eq!(calls[0].signature.as_deref(), Some("sig:s1/channels/reorder"));
        assert_eq!(calls[0].body, Some(json!({"id": "c1"})));
    }
}
