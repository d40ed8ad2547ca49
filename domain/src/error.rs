use std::time::Duration;

use thiserror::Error;

use crate::exchange_id::ExchangeId;

/// Rejected before network I/O, or mapped from a server validation code. Never retriable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed for {exchange}: field '{field}' value '{value}': {reason}")]
pub struct ValidationError {
    pub exchange: ExchangeId,
    pub field: String,
    pub value: String,
    pub reason: String,
}

/// Transport-level failure talking to an exchange endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connection error on {exchange} ({endpoint}): {reason} (retriable: {retriable})")]
pub struct ConnectionError {
    pub exchange: ExchangeId,
    pub endpoint: String,
    pub reason: String,
    pub retriable: bool,
}

/// HTTP 429 or a server rate-limit error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limited by {exchange}: weight {weight}, retry after {retry_after:?}")]
pub struct RateLimitError {
    pub exchange: ExchangeId,
    pub weight: u32,
    pub retry_after: Duration,
}

/// Authentication/authorization failure. Never retriable without operator intervention.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("authentication failed on {exchange}: {reason}")]
pub struct AuthError {
    pub exchange: ExchangeId,
    pub reason: String,
}

/// Drift between local and server clocks exceeded the configured bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("clock drift on {exchange} exceeds bound: local {local_ms}ms, server {server_ms}ms, drift {drift_ms}ms")]
pub struct ClockSyncError {
    pub exchange: ExchangeId,
    pub local_ms: i64,
    pub server_ms: i64,
    pub drift_ms: i64,
}

/// Surfaced only when a bounded reconnect schedule (`max_attempts > 0`) is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("websocket reconnect exhausted on {exchange} after {attempts}/{max} attempts: {reason}")]
pub struct WebSocketReconnectError {
    pub exchange: ExchangeId,
    pub attempts: u32,
    pub max: u32,
    pub reason: String,
}

/// Catch-all for typed server errors returned in a successful HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("exchange error on {exchange} during {op}: {message} (code: {code:?})")]
pub struct ExchangeApiError {
    pub exchange: ExchangeId,
    pub op: String,
    pub message: String,
    pub code: Option<i64>,
}

impl ExchangeApiError {
    pub fn new(exchange: ExchangeId, op: impl Into<String>, message: impl Into<String>, code: Option<i64>) -> Self {
        Self {
            exchange,
            op: op.into(),
            message: message.into(),
            code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    ClockSync(#[from] ClockSyncError),
    #[error(transparent)]
    WebSocketReconnect(#[from] WebSocketReconnectError),
    #[error(transparent)]
    Exchange(#[from] ExchangeApiError),
}

impl CoreError {
    /// Whether a caller may reasonably retry the operation that produced this error.
    pub fn is_retriable(&self) -> bool {
        match self {
            CoreError::Validation(_) => false,
            CoreError::Connection(e) => e.retriable,
            CoreError::RateLimit(_) => true,
            CoreError::Auth(_) => false,
            CoreError::ClockSync(_) => false,
            CoreError::WebSocketReconnect(_) => false,
            CoreError::Exchange(_) => false,
        }
    }
}
