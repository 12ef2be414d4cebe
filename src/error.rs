//! Error types for the sync core
//!
//! Provides the error taxonomy shared by every manager, using thiserror.
//! Remote and storage failures are classified into these variants before
//! they leave the component that observed them.

use std::time::Duration;

use thiserror::Error;

// == Sync Error Enum ==
/// Unified error type for the sync core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Network-class failure (connection, DNS, 5xx, 429)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A remote call did not finish within the per-call timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-network server error that is still worth retrying
    #[error("Remote error (status {status}): {message}")]
    Remote { status: u16, message: String },

    /// Not found, forbidden or does not exist
    #[error("Fatal response: {0}")]
    Fatal(String),

    /// Response payload did not have the expected shape
    #[error("Malformed response: {0}")]
    Parse(String),

    /// Local rate-limit policy refused the call
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The entity id is quarantined after a fatal response
    #[error("Entity marked invalid: {0}")]
    Invalid(String),

    /// A write was issued without a signing capability
    #[error("Write to {0} requires a signer")]
    MissingSigner(String),

    /// The entity is not present in the local cache
    #[error("Unknown entity: {0}")]
    Unknown(String),

    /// A reorder request does not match the local arrangement
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// Retry budget spent
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl SyncError {
    /// Network-class errors trigger endpoint failover.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Transient(_) | SyncError::Timeout(_))
    }

    /// Errors the retry policy may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient(_) | SyncError::Timeout(_) | SyncError::Remote { .. }
        )
    }

    /// Non-retryable responses from the remote service.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Fatal(_) | SyncError::Parse(_) | SyncError::MissingSigner(_)
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

// == Store Error Enum ==
/// Failure of the underlying persistence medium.
///
/// Never leaves the [`crate::storage::Persistence`] facade.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Storage is disabled or cannot be reached
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Writing would exceed the medium's quota
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// == Result Type Alias ==
/// Convenience Result type for the sync core.
pub type Result<T> = std::result::Result<T, SyncError>;
