//! Error types for dunesync core

use dunesync_types::ExecutionState;
use std::fmt;
use thiserror::Error;

/// Classification of a failed HTTP exchange, used for logging and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ConnectionLimitExhausted,
    ConnectionClosed,
    Unknown,
}

impl TransportErrorKind {
    /// Short label for log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ConnectionLimitExhausted => "conn_limit",
            TransportErrorKind::ConnectionClosed => "conn_close",
            TransportErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while syncing
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("Unexpected HTTP status: {status} - {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Storage write failed: {0}")]
    StorageWrite(#[from] sqlx::Error),

    #[error("Cancelled while waiting for a rate limit permit")]
    RateLimiterWait,

    #[error("Execution not ready: {state:?}")]
    ExecutionNotReady { state: ExecutionState },

    #[error("Execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("Sync was cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Check if this error is transient and the step may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { kind, .. } => matches!(
                kind,
                TransportErrorKind::Timeout
                    | TransportErrorKind::ConnectionLimitExhausted
                    | TransportErrorKind::ConnectionClosed
            ),
            SyncError::UnexpectedStatus { status, .. } => *status == 429,
            SyncError::ExecutionNotReady { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(kind: TransportErrorKind) -> SyncError {
        SyncError::Transport {
            kind,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_transient_transport_errors_are_retryable() {
        assert!(transport(TransportErrorKind::Timeout).is_retryable());
        assert!(transport(TransportErrorKind::ConnectionLimitExhausted).is_retryable());
        assert!(transport(TransportErrorKind::ConnectionClosed).is_retryable());
        assert!(!transport(TransportErrorKind::Unknown).is_retryable());
    }

    #[test]
    fn test_only_rate_limit_status_is_retryable() {
        let rate_limited = SyncError::UnexpectedStatus {
            status: 429,
            message: String::new(),
        };
        let unauthorized = SyncError::UnexpectedStatus {
            status: 401,
            message: String::new(),
        };
        let server = SyncError::UnexpectedStatus {
            status: 500,
            message: String::new(),
        };
        assert!(rate_limited.is_retryable());
        assert!(!unauthorized.is_retryable());
        assert!(!server.is_retryable());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!SyncError::MalformedResponse("bad".into()).is_retryable());
        assert!(!SyncError::RateLimiterWait.is_retryable());
        assert!(!SyncError::ExecutionFailed { message: "x".into() }.is_retryable());
        assert!(SyncError::ExecutionNotReady {
            state: ExecutionState::Executing
        }
        .is_retryable());
    }
}
