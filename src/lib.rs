//! # ScanWire
//!
//! Real-time connection manager for a network-security-assessment
//! dashboard. Keeps a Socket.IO connection to the scan-progress server
//! alive and fans its traffic out as typed events.
//!
//! ## Features
//!
//! - **Lifecycle state machine**: connect, disconnect, reconnect, give up
//! - **Exponential backoff**: capped delays with an attempt budget
//! - **Heartbeats**: correlated ping/pong with a sliding latency window
//! - **Offline queue**: messages sent while disconnected are flushed in order
//! - **Room restoration**: scan and room subscriptions survive reconnects
//! - **Typed events**: handlers per event kind with `on`/`once`/`off`
//!
//! ## Modules
//!
//! - [`connection`]: The connection manager and everything it owns
//! - [`transport`]: Transport trait and the Socket.IO WebSocket transport
//! - [`config`]: File and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanwire::{ConnectionConfig, ConnectionManager, EventKind};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = ConnectionManager::with_websocket(ConnectionConfig {
//!         url: "ws://localhost:8000".to_string(),
//!         auto_connect: false,
//!         ..Default::default()
//!     });
//!
//!     manager.on(EventKind::ScanCompleted, |event| {
//!         println!("scan finished: {}", event.data);
//!     });
//!
//!     if manager.connect().await {
//!         manager.join_scan("scan-42");
//!     }
//!
//!     // ...
//!
//!     manager.cleanup();
//! }
//! ```

pub mod config;
pub mod connection;
pub mod transport;

// Re-export top-level types for convenience
pub use connection::{
    AuthData, ConfigPatch, ConnectionConfig, ConnectionError, ConnectionInfo, ConnectionManager,
    ConnectionState, Event, EventKind, RoomKey, RoomType, Stats, Subscription,
};

pub use transport::{Transport, TransportError, WebSocketTransport};

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};
