//! Error types for the Poca client.
//!
//! Errors that cross the message-handling boundary (undecodable frames, unmatched
//! responses, server-reported errors) are logged by the router and never reach callers.
//! Everything else surfaces through [`PocaError`].

use std::time::Duration;
use thiserror::Error;

/// Main error type for the Poca client.
#[derive(Debug, Error)]
pub enum PocaError {
    // Addressing errors
    #[error("Invalid address {addr}: {message}")]
    InvalidAddress { addr: String, message: String },

    // Connection errors
    #[error("Failed to connect to {url}: {message}")]
    ConnectFailed { url: String, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed before a response arrived for {key}")]
    ConnectionClosed { key: String },

    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<tokio_tungstenite::tungstenite::Error>,
    },

    // Wire format errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Mirror errors
    #[error("No mirror for key {key}")]
    UnknownKey { key: String },

    #[error("Mirror for {key} is not an object, cannot set field {field}")]
    NotAnObject { key: String, field: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Poca operations.
pub type Result<T> = std::result::Result<T, PocaError>;

impl From<serde_json::Error> for PocaError {
    fn from(err: serde_json::Error) -> Self {
        PocaError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PocaError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        PocaError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl PocaError {
    /// Create a protocol error from any message.
    pub fn protocol(message: impl Into<String>) -> Self {
        PocaError::Protocol {
            message: message.into(),
        }
    }

    /// Check if reconnecting and retrying could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PocaError::ConnectFailed { .. }
                | PocaError::Timeout(_)
                | PocaError::NotConnected
                | PocaError::ConnectionClosed { .. }
                | PocaError::Transport { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PocaError::ConnectionClosed {
            key: "guess".into(),
        };
        assert_eq!(
            err.to_string(),
            "Connection closed before a response arrived for guess"
        );
        assert_eq!(PocaError::UnknownKind(9).to_string(), "Unknown message kind: 9");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(PocaError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(PocaError::NotConnected.is_retryable());
        assert!(!PocaError::UnknownKind(7).is_retryable());
        assert!(!PocaError::protocol("missing key").is_retryable());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: PocaError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, PocaError::Json { source: Some(_), .. }));
    }
}
