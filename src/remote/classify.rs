//! Maps raw responses onto the error taxonomy.

use serde_json::Value;

use crate::error::SyncError;
use crate::remote::RemoteResponse;

/// Substrings that mark a network-class failure.
const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "econnreset",
    "econnrefused",
    "enotfound",
    "dns",
    "network",
    "socket hang up",
    "failed to fetch",
    "too many requests",
    "rate limit",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
    "internal server error",
];

/// Substrings that mark a fatal, non-retryable response.
const FATAL_PATTERNS: &[&str] = &[
    "not found",
    "does not exist",
    "doesn't exist",
    "forbidden",
    "unauthorized",
    "not a member",
];

/// Turns a response into its payload or a classified error.
pub fn interpret(response: RemoteResponse) -> Result<Value, SyncError> {
    if response.is_success() {
        return Ok(response.payload.unwrap_or(Value::Null));
    }
    Err(classify_response(response.status, response.error.as_deref()))
}

/// Classifies a failed response.
///
/// Status codes win over message text; messages are matched case-insensitively.
pub fn classify_response(status: u16, error: Option<&str>) -> SyncError {
    let message = error
        .map(str::to_string)
        .unwrap_or_else(|| format!("status {status}"));

    match status {
        403 | 404 => return SyncError::Fatal(message),
        429 | 500..=599 => return SyncError::Transient(message),
        _ => {}
    }

    let lowered = message.to_lowercase();
    if FATAL_PATTERNS.iter().any(|p| lowered.contains(p)) {
        SyncError::Fatal(message)
    } else if NETWORK_PATTERNS.iter().any(|p| lowered.contains(p)) {
        SyncError::Transient(message)
    } else {
        SyncError::Remote { status, message }
    }
}

/// True if a free-form error message looks network-related.
pub fn is_network_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    NETWORK_PATTERNS.iter().any(|p| lowered.contains(p))
}
