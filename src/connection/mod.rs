//! Real-Time Connection Management
//!
//! Keeps a Socket.IO-style connection to the scan-progress server alive and
//! turns everything it carries into typed events.
//!
//! ## Architecture
//!
//! - **ConnectionManager**: lifecycle state machine, reconnection, heartbeat,
//!   offline queue, room restoration and statistics
//! - **EventBus**: typed in-process fan-out to consumers
//! - **Messages**: wire event names and payload models
//! - **ReconnectPolicy**: exponential backoff with a cap and attempt budget
//!
//! ## Example
//!
//! ```rust,no_run
//! use scanwire::connection::{ConnectionConfig, ConnectionManager, EventKind, ScanProgress};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ConnectionConfig {
//!         url: "ws://localhost:8000".to_string(),
//!         auto_connect: false,
//!         ..Default::default()
//!     };
//!     let manager = ConnectionManager::with_websocket(config);
//!
//!     manager.on(EventKind::ScanProgress, |event| {
//!         if let Ok(progress) = event.decode::<ScanProgress>() {
//!             println!("{}: {:.1}%", progress.scan_id, progress.progress);
//!         }
//!     });
//!
//!     if manager.connect().await {
//!         manager.join_scan("scan-42");
//!     }
//! }
//! ```

mod backoff;
mod config;
mod error;
pub mod events;
mod manager;
pub mod messages;
mod queue;
mod rooms;
mod state;

pub use backoff::ReconnectPolicy;
pub use config::{ConfigPatch, ConnectionConfig};
pub use error::ConnectionError;
pub use events::{Event, EventBus, EventKind, EventSource, HandlerId, Subscription};
pub use manager::{ConnectionManager, DebugInfo, CLIENT_DISCONNECT};
pub use messages::{
    ActiveScans, AuthData, Notification, PingPong, ScanCompleted, ScanErrorReport, ScanMembership,
    ScanProgress, SubscriptionSettings, SystemMessage,
};
pub use queue::{MessageQueue, PendingMessage};
pub use rooms::{RoomKey, RoomSet, RoomType};
pub use state::{ConnectionInfo, ConnectionState, LatencyWindow, Stats, LATENCY_WINDOW_SIZE};
