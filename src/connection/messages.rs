//! Scan-Progress Message Types
//!
//! Wire event names and the payloads exchanged with the scan-progress
//! server, plus the payloads the manager attaches to its own lifecycle
//! events. Server payloads are lenient: unknown fields are ignored and
//! most fields are optional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::events::EventKind;

/// Events the manager sends to the server
pub mod outbound {
    pub const JOIN_SCAN: &str = "join_scan";
    pub const LEAVE_SCAN: &str = "leave_scan";
    pub const GET_SCAN_STATUS: &str = "get_scan_status";
    pub const STOP_SCAN: &str = "stop_scan";
    pub const GET_ACTIVE_SCANS: &str = "get_active_scans";
    pub const JOIN_ROOM: &str = "join_room";
    pub const LEAVE_ROOM: &str = "leave_room";
    pub const SUBSCRIBE_UPDATES: &str = "subscribe_updates";
    pub const UNSUBSCRIBE_UPDATES: &str = "unsubscribe_updates";
    pub const PING: &str = "ping";
    pub const AUTHENTICATE: &str = "authenticate";
    pub const UNAUTHENTICATE: &str = "unauthenticate";
}

/// Application events the server sends to the manager
pub mod inbound {
    pub const CONNECTED: &str = "connected";
    pub const SCAN_PROGRESS: &str = "scan_progress";
    pub const SCAN_COMPLETED: &str = "scan_completed";
    pub const SCAN_STOPPED: &str = "scan_stopped";
    pub const SCAN_ERROR: &str = "scan_error";
    pub const SCAN_STATUS: &str = "scan_status";
    pub const SCAN_NOT_FOUND: &str = "scan_not_found";
    pub const JOIN_SUCCESS: &str = "join_success";
    pub const LEAVE_SUCCESS: &str = "leave_success";
    pub const ACTIVE_SCANS: &str = "active_scans";
    pub const NOTIFICATION: &str = "notification";
    pub const SYSTEM_MESSAGE: &str = "system_message";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
    pub const RATE_LIMIT: &str = "rate_limit";
}

/// Consumer-facing kind an inbound server event is re-emitted as
pub fn relay_kind(inbound_event: &str) -> Option<EventKind> {
    let kind = match inbound_event {
        inbound::CONNECTED => EventKind::ServerConnected,
        inbound::SCAN_PROGRESS => EventKind::ScanProgress,
        inbound::SCAN_COMPLETED => EventKind::ScanCompleted,
        inbound::SCAN_STOPPED => EventKind::ScanStopped,
        inbound::SCAN_ERROR => EventKind::ScanError,
        inbound::SCAN_STATUS => EventKind::ScanStatus,
        inbound::SCAN_NOT_FOUND => EventKind::ScanNotFound,
        inbound::JOIN_SUCCESS => EventKind::ScanJoined,
        inbound::LEAVE_SUCCESS => EventKind::ScanLeft,
        inbound::ACTIVE_SCANS => EventKind::ActiveScans,
        inbound::NOTIFICATION => EventKind::Notification,
        inbound::SYSTEM_MESSAGE => EventKind::SystemMessage,
        inbound::PONG => EventKind::PongReceived,
        inbound::ERROR => EventKind::ServerError,
        inbound::RATE_LIMIT => EventKind::RateLimit,
        _ => return None,
    };
    Some(kind)
}

// ===== Server payloads =====

/// Server confirmation sent after the namespace connect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerHello {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Progress update for a running scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub scan_id: String,
    pub progress: f64,
    #[serde(default)]
    pub current_phase: String,
    pub message: Option<String>,
    pub hosts_scanned: Option<u64>,
    pub ports_found: Option<u64>,
    pub services_found: Option<u64>,
    pub vulnerabilities_found: Option<u64>,
    pub estimated_time_remaining: Option<u64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsSummary {
    #[serde(default)]
    pub hosts_discovered: u64,
    #[serde(default)]
    pub ports_found: u64,
    #[serde(default)]
    pub services_identified: u64,
    #[serde(default)]
    pub vulnerabilities_detected: u64,
    pub security_score: Option<f64>,
}

/// Final result of a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCompleted {
    pub scan_id: String,
    pub status: ScanOutcome,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub results_summary: ResultsSummary,
    pub report_url: Option<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// Scan failure report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanErrorReport {
    pub scan_id: String,
    #[serde(default)]
    pub error_type: String,
    pub error_message: String,
    pub error_code: Option<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub recoverable: bool,
    pub suggested_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveScan {
    pub scan_id: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    pub started_at: Option<String>,
    pub estimated_completion: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemLoad {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub active_threads: u64,
}

/// Scans currently running on the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveScans {
    pub count: u64,
    #[serde(default)]
    pub scans: Vec<ActiveScan>,
    #[serde(default)]
    pub system_load: SystemLoad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    Joined,
    AlreadyJoined,
    NotFound,
    AccessDenied,
}

/// Server answer to `join_scan` / `leave_scan`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMembership {
    pub scan_id: String,
    pub status: Option<JoinStatus>,
    pub message: Option<String>,
    pub scan_info: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAction {
    pub label: String,
    pub action: String,
    pub style: Option<String>,
}

/// Broadcast operator message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(rename = "type")]
    pub level: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub action_required: bool,
    #[serde(default)]
    pub actions: Vec<MessageAction>,
    pub expires_at: Option<String>,
}

/// User-facing notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub level: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub actions: Vec<MessageAction>,
    pub metadata: Option<Map<String, Value>>,
}

// ===== Client payloads =====

/// Body of an outbound `ping`, echoed back in `pong`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingPong {
    pub client_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    /// Correlates a pong with the ping that caused it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_id: Option<u64>,
}

/// Filter for `subscribe_updates` / `unsubscribe_updates`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<EventKind>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub scan_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub notification_levels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<u32>,
}

/// Pass-through credentials attached to the handshake
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthData {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }

    /// Copy with the token replaced by a placeholder
    pub fn redacted(&self) -> Self {
        Self {
            token: self.token.as_ref().map(|_| "[HIDDEN]".to_string()),
            ..self.clone()
        }
    }
}

/// Payload of the `connected` lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    pub id: Option<String>,
    pub transport: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Payload of the `disconnected` lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectedPayload {
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of the `reconnecting` lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectingPayload {
    /// 1-based number of the retry being scheduled
    pub attempt: u32,
    pub delay_ms: u64,
    pub max_attempts: u32,
}

/// Payload of the `error` lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relay_kinds() {
        assert_eq!(relay_kind("join_success"), Some(EventKind::ScanJoined));
        assert_eq!(relay_kind("error"), Some(EventKind::ServerError));
        assert_eq!(relay_kind("pong"), Some(EventKind::PongReceived));
        assert_eq!(relay_kind("connected"), Some(EventKind::ServerConnected));
        assert_eq!(relay_kind("user_message"), None);
    }

    #[test]
    fn test_scan_progress_deserialize_partial() {
        let progress: ScanProgress = serde_json::from_value(json!({
            "scan_id": "scan-42",
            "progress": 37.5,
            "current_phase": "port_scan",
            "ports_found": 12,
            "unexpected": "ignored"
        }))
        .unwrap();

        assert_eq!(progress.scan_id, "scan-42");
        assert_eq!(progress.progress, 37.5);
        assert_eq!(progress.ports_found, Some(12));
        assert_eq!(progress.hosts_scanned, None);
    }

    #[test]
    fn test_scan_completed_deserialize() {
        let completed: ScanCompleted = serde_json::from_value(json!({
            "scan_id": "scan-42",
            "status": "cancelled",
            "duration": 12.0,
            "results_summary": {"hosts_discovered": 3, "ports_found": 9}
        }))
        .unwrap();

        assert_eq!(completed.status, ScanOutcome::Cancelled);
        assert_eq!(completed.results_summary.hosts_discovered, 3);
        assert_eq!(completed.results_summary.services_identified, 0);
    }

    #[test]
    fn test_notification_type_field() {
        let notification: Notification = serde_json::from_value(json!({
            "id": "n1",
            "type": "warning",
            "title": "Scan slow",
            "message": "Target is rate limiting probes"
        }))
        .unwrap();
        assert_eq!(notification.level, "warning");
        assert!(!notification.persistent);
    }

    #[test]
    fn test_auth_data_serialize_and_redact() {
        let mut auth = AuthData::with_token("secret");
        auth.user_id = Some("u1".to_string());
        auth.extra.insert("tenant".to_string(), json!("acme"));

        let value = serde_json::to_value(&auth).unwrap();
        assert_eq!(value, json!({"token": "secret", "user_id": "u1", "tenant": "acme"}));

        let redacted = auth.redacted();
        assert_eq!(redacted.token.as_deref(), Some("[HIDDEN]"));
        assert_eq!(redacted.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_ping_serializes_only_present_fields() {
        let ping = PingPong {
            client_time: "2024-01-01T00:00:00Z".to_string(),
            ping_id: Some(4),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&ping).unwrap(),
            json!({"client_time": "2024-01-01T00:00:00Z", "ping_id": 4})
        );
    }
}
