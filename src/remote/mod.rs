//! Remote Module
//!
//! Everything between the managers and the wire: the transport seam, error
//! classification, the shared retry policy and the failover client.
//!
//! # Transports
//! - [`HttpTransport`]: reqwest against `{endpoint}/{entity_id}/{operation}`
//! - [`ScriptedTransport`]: canned replies for tests

mod classify;
mod client;
mod http;
mod mock;
mod retry;
mod transport;

pub use classify::{classify_response, interpret};
pub use client::RemoteClient;
pub use http::{HttpTransport, SIGNATURE_HEADER};
pub use mock::{Reply, ScriptedTransport};
pub use retry::RetryPolicy;
pub use transport::{CallOptions, Method, RemoteRequest, RemoteResponse, Signer, Transport};
