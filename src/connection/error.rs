//! Connection manager error types
//!
//! These never cross the manager's public boundary as `Err` values. They
//! are rendered into `error` events and `Stats::last_error`.

use thiserror::Error;

use crate::transport::TransportError;

/// Failures observed by the connection manager
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// No usable transport (missing runtime, disabled transport, ...)
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// No connection confirmation within the configured timeout
    #[error("Connection error: Connection timeout")]
    Timeout,

    /// Transport reported a failed connection attempt
    #[error("Connection error: {0}")]
    Connect(String),

    /// Emitting an outbound event failed
    #[error("Failed to send message: {0}")]
    Send(String),

    /// Automatic reconnection gave up
    #[error("Max reconnection attempts exceeded")]
    ReconnectExhausted { attempts: u32 },

    /// A consumer event handler panicked
    #[error("Event handler error for {event}: {message}")]
    Handler { event: String, message: String },

    /// Programmatic misuse, e.g. an empty scan id
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<TransportError> for ConnectionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(reason) => ConnectionError::TransportUnavailable(reason),
            other => ConnectionError::Send(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ConnectionError::Timeout.to_string(),
            "Connection error: Connection timeout"
        );
        assert_eq!(
            ConnectionError::ReconnectExhausted { attempts: 3 }.to_string(),
            "Max reconnection attempts exceeded"
        );
        assert_eq!(
            ConnectionError::Connect("xhr poll error".to_string()).to_string(),
            "Connection error: xhr poll error"
        );
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: ConnectionError = TransportError::Unavailable("no tokio runtime".to_string()).into();
        assert!(matches!(err, ConnectionError::TransportUnavailable(_)));

        let err: ConnectionError = TransportError::NotConnected.into();
        assert_eq!(err.to_string(), "Failed to send message: Transport not connected");
    }
}
