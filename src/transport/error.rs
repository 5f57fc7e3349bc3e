//! Transport error types

use thiserror::Error;

/// Errors raised by a transport implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The transport cannot be used in this environment
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// Emit called without an open connection
    #[error("Transport not connected")]
    NotConnected,

    /// Writing to the socket failed
    #[error("Send failed: {0}")]
    Send(String),

    /// Malformed or unsupported packet
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Unavailable("no tokio runtime".to_string());
        assert_eq!(err.to_string(), "Transport unavailable: no tokio runtime");
        assert_eq!(TransportError::NotConnected.to_string(), "Transport not connected");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: TransportError = json_err.into();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
