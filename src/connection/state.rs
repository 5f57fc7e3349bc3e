//! Connection State Types
//!
//! Snapshots handed to consumers: lifecycle state, connection info,
//! cumulative statistics and the latency window behind them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Number of round-trip samples averaged into `Stats::average_latency_ms`
pub const LATENCY_WINDOW_SIZE: usize = 10;

/// Lifecycle state of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Automatic reconnection gave up; only a manual `connect()` leaves it
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current connection snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    /// Base URL + namespace
    pub url: String,
    pub namespace: String,
    pub connected: bool,
    pub connecting: bool,
    pub state: ConnectionState,
    /// Server-assigned session id
    pub id: Option<String>,
    /// Negotiated transport name
    pub transport: Option<String>,
    pub authenticated: bool,
    pub permissions: Vec<String>,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_disconnected: Option<DateTime<Utc>>,
    pub total_reconnects: u32,
    /// Milliseconds since the current connection was established
    pub uptime_ms: u64,
}

impl ConnectionInfo {
    pub fn new(url: String, namespace: String) -> Self {
        Self {
            url,
            namespace,
            connected: false,
            connecting: false,
            state: ConnectionState::Disconnected,
            id: None,
            transport: None,
            authenticated: false,
            permissions: Vec::new(),
            last_connected: None,
            last_disconnected: None,
            total_reconnects: 0,
            uptime_ms: 0,
        }
    }

    /// Move to `Connecting`
    pub(crate) fn mark_connecting(&mut self) {
        self.connected = false;
        self.connecting = true;
        self.state = ConnectionState::Connecting;
    }

    /// Move to `Connected`
    pub(crate) fn mark_connected(&mut self) {
        self.connected = true;
        self.connecting = false;
        self.state = ConnectionState::Connected;
        self.last_connected = Some(Utc::now());
    }

    /// Move to `Disconnected`
    pub(crate) fn mark_disconnected(&mut self) {
        if self.connected {
            self.last_disconnected = Some(Utc::now());
        }
        self.connected = false;
        self.connecting = false;
        self.state = ConnectionState::Disconnected;
    }
}

/// Cumulative counters for the manager's lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub total_connections: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub total_messages: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Messages parked in the offline queue
    pub messages_queued: u64,
    /// Messages evicted from a full offline queue
    pub messages_dropped: u64,
    pub reconnect_attempts: u64,
    pub current_uptime_ms: u64,
    pub total_uptime_ms: u64,
    pub average_latency_ms: f64,
    pub last_latency_ms: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl Stats {
    pub(crate) fn record_error(&mut self, message: &str) {
        self.error_count += 1;
        self.last_error = Some(message.to_string());
    }

    pub(crate) fn record_latency(&mut self, window: &mut LatencyWindow, latency_ms: u64) {
        window.push(latency_ms);
        self.last_latency_ms = latency_ms;
        self.average_latency_ms = window.average();
    }
}

/// Fixed-size sliding window of round-trip samples
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(LATENCY_WINDOW_SIZE)
    }
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append a sample, discarding the oldest beyond capacity
    pub fn push(&mut self, sample_ms: u64) {
        self.samples.push_back(sample_ms);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Arithmetic mean of the retained samples (0 when empty)
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
    }

    pub fn last(&self) -> Option<u64> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_window_keeps_last_ten() {
        let mut window = LatencyWindow::default();
        for sample in 1..=12u64 {
            window.push(sample * 10);
        }

        assert_eq!(window.len(), LATENCY_WINDOW_SIZE);
        assert_eq!(window.last(), Some(120));
        // mean of 30..=120 step 10
        assert_eq!(window.average(), 75.0);
    }

    #[test]
    fn test_empty_window_average_is_zero() {
        let window = LatencyWindow::default();
        assert!(window.is_empty());
        assert_eq!(window.average(), 0.0);
    }

    #[test]
    fn test_state_transitions_never_connected_and_connecting() {
        let mut info = ConnectionInfo::new("ws://localhost/ns".into(), "/ns".into());
        info.mark_connecting();
        assert!(info.connecting && !info.connected);
        assert_eq!(info.state, ConnectionState::Connecting);

        info.mark_connected();
        assert!(info.connected && !info.connecting);
        assert!(info.last_connected.is_some());

        info.mark_disconnected();
        assert!(!info.connected && !info.connecting);
        assert_eq!(info.state, ConnectionState::Disconnected);
        assert!(info.last_disconnected.is_some());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Error).unwrap(),
            "\"error\""
        );
    }

    #[test]
    fn test_record_error() {
        let mut stats = Stats::default();
        stats.record_error("boom");
        stats.record_error("bang");
        assert_eq!(stats.error_count, 2);
        assert_eq!(stats.last_error.as_deref(), Some("bang"));
    }
}
