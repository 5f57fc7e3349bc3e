//! Transport Layer
//!
//! The connection manager drives a transport but never implements one.
//! A transport opens the underlying socket, emits named events and reports
//! everything it observes back through a [`TransportEventSender`].
//!
//! ## Implementations
//!
//! - [`WebSocketTransport`]: Engine.IO v4 / Socket.IO v5 text framing over
//!   `tokio-tungstenite` (WebSocket only, no long-polling)
//! - `mock::MockTransport` (tests only): scripted in-memory transport

mod error;
pub mod socketio;
mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use error::TransportError;
pub use websocket::WebSocketTransport;

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Reason reported by a transport when the client closed the socket itself.
///
/// Disconnects carrying this reason never trigger automatic reconnection.
pub const CLIENT_DISCONNECT_REASON: &str = "io client disconnect";

/// Callback invoked with the server's acknowledgement payload
pub type AckCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// Channel used by a transport to report inbound events
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Everything the manager hands to a transport when opening a connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    /// Base server URL (e.g. `ws://localhost:8000`)
    pub url: String,
    /// Socket.IO namespace (e.g. `/scan-progress`)
    pub namespace: String,
    /// Allowed transports in preference order
    pub transports: Vec<String>,
    /// Connect timeout enforced by the manager
    pub timeout: Duration,
    pub upgrade: bool,
    pub force_new: bool,
    pub compression: bool,
    /// Handshake query parameters
    pub query: BTreeMap<String, String>,
    /// Namespace auth payload
    pub auth: Map<String, Value>,
}

/// Events a transport reports back to the manager
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Namespace connection confirmed
    Connect {
        session_id: Option<String>,
        transport: Option<String>,
    },
    /// An established connection was closed
    Disconnect { reason: String },
    /// The connection attempt failed before it was established
    ConnectError { message: String },
    /// Named application event from the server
    Message { event: String, data: Value },
}

impl TransportEvent {
    /// Whether a disconnect reason means the client closed the socket
    pub fn is_client_disconnect(reason: &str) -> bool {
        reason == CLIENT_DISCONNECT_REASON || reason == "client_disconnect"
    }
}

/// Bidirectional, event-based socket capability
///
/// All methods are synchronous; network I/O happens on tasks owned by the
/// transport. Inbound events must only be sent on the channel handed to the
/// most recent [`Transport::connect`] call.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a connection.
    ///
    /// Returns [`TransportError::Unavailable`] when the transport cannot be
    /// used at all. Failures after this call returns are reported as
    /// [`TransportEvent::ConnectError`].
    fn connect(
        &self,
        request: ConnectRequest,
        events: TransportEventSender,
    ) -> Result<(), TransportError>;

    /// Close the current connection, if any
    fn disconnect(&self);

    /// Emit a named event, optionally requesting an acknowledgement
    fn emit(&self, event: &str, data: Value, ack: Option<AckCallback>)
        -> Result<(), TransportError>;

    /// Whether the underlying socket is currently connected
    fn is_connected(&self) -> bool;

    /// Short transport name for diagnostics
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_disconnect_reasons() {
        assert!(TransportEvent::is_client_disconnect("io client disconnect"));
        assert!(TransportEvent::is_client_disconnect("client_disconnect"));
        assert!(!TransportEvent::is_client_disconnect("transport close"));
        assert!(!TransportEvent::is_client_disconnect("io server disconnect"));
    }
}
