//! Connection Manager
//!
//! Owns the connection lifecycle on top of an injected [`Transport`]:
//!
//! - State machine: `Disconnected → Connecting → Connected`, falling back to
//!   `Reconnecting` (exponential backoff) and finally `Error` once the retry
//!   budget is spent
//! - Heartbeat pings with per-ping correlation and a sliding latency window
//! - Offline queue flushed right after every successful connection
//! - Room set re-joined on every successful connection, before consumers
//!   see `connected`
//! - Typed event fan-out through an [`EventBus`]
//!
//! All state lives behind one lock. Events produced while it is held are
//! collected and dispatched only after it is released, so handlers may call
//! back into the manager. Every timer and transport pump is stamped with a
//! connection epoch; `disconnect()` bumps the epoch so nothing scheduled
//! earlier can take effect afterwards.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use super::backoff::ReconnectPolicy;
use super::config::{ConfigPatch, ConnectionConfig};
use super::error::ConnectionError;
use super::events::{Event, EventBus, EventKind, HandlerId, Subscription};
use super::messages::{
    inbound, outbound, relay_kind, AuthData, ConnectedPayload, DisconnectedPayload, ErrorPayload,
    PingPong, ReconnectingPayload, ServerHello, SubscriptionSettings,
};
use super::queue::{MessageQueue, PendingMessage};
use super::rooms::{RoomKey, RoomSet, RoomType};
use super::state::{ConnectionInfo, ConnectionState, LatencyWindow, Stats};
use crate::transport::{
    AckCallback, ConnectRequest, Transport, TransportError, TransportEvent, WebSocketTransport,
};

/// Disconnect reason reported for `disconnect()` and `cleanup()`
pub const CLIENT_DISCONNECT: &str = "client_disconnect";

/// Pings awaiting a pong; older ones are forgotten
const MAX_OUTSTANDING_PINGS: usize = 16;

const CLIENT_VERSION: &str = "3.0";
const CLIENT_NAME: &str = "scanwire";

#[derive(Default)]
struct Timers {
    connect_timeout: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Timers {
    fn abort_all(&mut self) {
        for handle in [
            self.connect_timeout.take(),
            self.reconnect.take(),
            self.heartbeat.take(),
            self.pump.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

struct OutstandingPing {
    id: u64,
    sent_at: Instant,
}

struct ManagerState {
    config: ConnectionConfig,
    info: ConnectionInfo,
    stats: Stats,
    latency: LatencyWindow,
    queue: MessageQueue,
    rooms: RoomSet,
    current_scan_id: Option<String>,
    auth: Option<AuthData>,
    /// Bumped whenever an attempt or connection ends
    epoch: u64,
    /// Consecutive automatic retries since the last success
    reconnect_attempt: u32,
    connected_since: Option<Instant>,
    waiters: Vec<oneshot::Sender<bool>>,
    pings: VecDeque<OutstandingPing>,
    next_ping_id: u64,
    timers: Timers,
}

impl ManagerState {
    fn uptime(&self) -> Duration {
        self.connected_since
            .map(|since| since.elapsed())
            .unwrap_or_default()
    }

    fn accumulate_uptime(&mut self) {
        if let Some(since) = self.connected_since.take() {
            self.stats.total_uptime_ms += millis(since.elapsed());
        }
        self.stats.current_uptime_ms = 0;
    }

    fn settle_waiters(&mut self, connected: bool) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(connected);
        }
    }
}

struct Inner {
    client_id: String,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    state: Mutex<ManagerState>,
}

impl Inner {
    /// Dispatch events collected while the state lock was held
    fn publish(&self, events: Vec<Event>) {
        for event in events {
            if self.state.lock().config.debug {
                tracing::debug!(event = %event.kind, data = %event.data, "Dispatching event");
            }
            for message in self.bus.dispatch(&event) {
                let err = ConnectionError::Handler {
                    event: event.kind.to_string(),
                    message,
                };
                let text = err.to_string();
                tracing::error!(error = %text, "Event handler panicked");
                self.state.lock().stats.record_error(&text);

                if event.kind != EventKind::Error {
                    for nested in self.bus.dispatch(&error_event(&text, None)) {
                        tracing::error!(error = %nested, "Error handler panicked");
                    }
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().timers.abort_all();
        self.transport.disconnect();
    }
}

/// Snapshot returned by [`ConnectionManager::debug_info`]
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub client_id: String,
    pub transport: &'static str,
    pub state: ConnectionState,
    pub connection: ConnectionInfo,
    pub stats: Stats,
    pub config: ConnectionConfig,
    pub auth: Option<AuthData>,
    pub queue_len: usize,
    pub rooms: Vec<String>,
    pub current_scan_id: Option<String>,
    pub reconnect_attempt: u32,
    pub outstanding_pings: usize,
    pub registered_events: Vec<EventKind>,
}

/// Real-time connection to the scan-progress server
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager driving `transport`.
    ///
    /// With `auto_connect` set, the first `connect()` is spawned on the
    /// current tokio runtime.
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let info = ConnectionInfo::new(config.connection_url(), config.namespace.clone());
        let auto_connect = config.auto_connect;

        let state = ManagerState {
            queue: MessageQueue::new(config.max_queue_size),
            config,
            info,
            stats: Stats::default(),
            latency: LatencyWindow::default(),
            rooms: RoomSet::new(),
            current_scan_id: None,
            auth: None,
            epoch: 0,
            reconnect_attempt: 0,
            connected_since: None,
            waiters: Vec::new(),
            pings: VecDeque::new(),
            next_ping_id: 0,
            timers: Timers::default(),
        };

        let manager = Self {
            inner: Arc::new(Inner {
                client_id: Uuid::new_v4().to_string(),
                transport,
                bus: EventBus::new(),
                state: Mutex::new(state),
            }),
        };

        if auto_connect {
            let auto = manager.clone();
            if spawn_task(async move {
                auto.connect().await;
            })
            .is_none()
            {
                tracing::warn!("auto_connect requested outside a tokio runtime, call connect() manually");
            }
        }

        manager
    }

    /// Create a manager using the Socket.IO WebSocket transport
    pub fn with_websocket(config: ConnectionConfig) -> Self {
        Self::new(config, Arc::new(WebSocketTransport::default()))
    }

    // ===== Lifecycle =====

    /// Connect, or join the attempt already in flight.
    ///
    /// Resolves `true` once connected and `false` if the attempt fails.
    pub async fn connect(&self) -> bool {
        let mut outbox = Vec::new();
        let pending = {
            let mut guard = self.inner.state.lock();
            self.begin_connect(&mut guard, &mut outbox)
        };
        self.inner.publish(outbox);

        match pending {
            Ok(receiver) => receiver.await.unwrap_or(false),
            Err(connected) => connected,
        }
    }

    /// Close the connection and stop every timer.
    ///
    /// Never triggers automatic reconnection. Always emits `disconnected`
    /// with reason `client_disconnect`, even when already idle. Desired
    /// rooms are kept and re-joined by the next `connect()`.
    pub fn disconnect(&self) {
        let mut outbox = Vec::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            end_attempt(state);
            self.inner.transport.disconnect();
            state.accumulate_uptime();
            state.info.mark_disconnected();
            state.info.id = None;
            state.current_scan_id = None;
            state.queue.clear();
            state.pings.clear();
            state.reconnect_attempt = 0;
            state.settle_waiters(false);

            if state.config.enable_logging {
                tracing::info!(url = %state.info.url, "Disconnected by client");
            }
            outbox.push(client_event(
                EventKind::Disconnected,
                &DisconnectedPayload {
                    reason: CLIENT_DISCONNECT.to_string(),
                    timestamp: Utc::now(),
                },
            ));
        }
        self.inner.publish(outbox);
    }

    /// Disconnect and forget handlers, queued messages, rooms and auth
    pub fn cleanup(&self) {
        self.disconnect();
        self.inner.bus.clear();

        let mut state = self.inner.state.lock();
        state.queue.clear();
        state.rooms.clear();
        state.auth = None;
        state.current_scan_id = None;
        state.info.authenticated = false;
        state.info.permissions.clear();
    }

    // ===== Messaging =====

    /// Emit `event`, or queue it while offline.
    ///
    /// Returns `true` only when the transport accepted the message.
    pub fn send(&self, event: &str, data: Value) -> bool {
        self.send_with(event, data, None)
    }

    /// Like [`send`](Self::send), invoking `ack` with the server's reply
    pub fn send_with_ack<F>(&self, event: &str, data: Value, ack: F) -> bool
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.send_with(event, data, Some(Box::new(ack)))
    }

    fn send_with(&self, event: &str, data: Value, ack: Option<AckCallback>) -> bool {
        let mut outbox = Vec::new();
        let sent = {
            let mut guard = self.inner.state.lock();
            self.send_locked(&mut guard, event, data, ack, &mut outbox)
        };
        self.inner.publish(outbox);
        sent
    }

    /// Send a latency probe; `false` when not connected
    pub fn ping(&self, extra: Option<Value>) -> bool {
        let mut outbox = Vec::new();
        let sent = {
            let mut guard = self.inner.state.lock();
            self.ping_locked(&mut guard, extra, &mut outbox)
        };
        self.inner.publish(outbox);
        sent
    }

    // ===== Scans and rooms =====

    /// Subscribe to a scan's progress.
    ///
    /// The room is remembered even while offline and joined on connect.
    pub fn join_scan(&self, scan_id: &str) -> bool {
        if !valid_id("join_scan", scan_id) {
            return false;
        }
        self.with_state(|manager, state, outbox| {
            state.rooms.insert(RoomKey::scan(scan_id));
            if !manager.is_live(state) {
                return false;
            }
            manager.send_locked(
                state,
                outbound::JOIN_SCAN,
                json!({ "scan_id": scan_id }),
                None,
                outbox,
            )
        })
    }

    /// Leave `scan_id`, or the current scan when `None`
    pub fn leave_scan(&self, scan_id: Option<&str>) -> bool {
        self.with_state(|manager, state, outbox| {
            let target = scan_id
                .filter(|id| !id.trim().is_empty())
                .map(str::to_string)
                .or_else(|| state.current_scan_id.clone());
            let Some(target) = target else {
                tracing::warn!("leave_scan called without a scan id and no current scan");
                return false;
            };

            state.rooms.remove(&RoomKey::scan(target.as_str()));
            if state.current_scan_id.as_deref() == Some(target.as_str()) {
                state.current_scan_id = None;
            }
            if !manager.is_live(state) {
                return false;
            }
            manager.send_locked(
                state,
                outbound::LEAVE_SCAN,
                json!({ "scan_id": target }),
                None,
                outbox,
            )
        })
    }

    /// Join a room. While offline the room is only recorded (nothing is
    /// queued) and joined on the next connection.
    pub fn join_room(&self, room: &str, room_type: RoomType) -> bool {
        if !valid_id("join_room", room) {
            return false;
        }
        self.with_state(|manager, state, outbox| {
            state.rooms.insert(RoomKey::new(room_type, room));
            if !manager.is_live(state) {
                return false;
            }
            manager.send_locked(state, outbound::JOIN_ROOM, room_payload(room, room_type), None, outbox)
        })
    }

    /// Leave a room. While offline the room is only forgotten, nothing is queued.
    pub fn leave_room(&self, room: &str, room_type: RoomType) -> bool {
        if !valid_id("leave_room", room) {
            return false;
        }
        self.with_state(|manager, state, outbox| {
            state.rooms.remove(&RoomKey::new(room_type, room));
            if !manager.is_live(state) {
                return false;
            }
            manager.send_locked(state, outbound::LEAVE_ROOM, room_payload(room, room_type), None, outbox)
        })
    }

    pub fn get_scan_status(&self, scan_id: &str) -> bool {
        valid_id("get_scan_status", scan_id)
            && self.send(outbound::GET_SCAN_STATUS, json!({ "scan_id": scan_id }))
    }

    pub fn stop_scan(&self, scan_id: &str) -> bool {
        valid_id("stop_scan", scan_id) && self.send(outbound::STOP_SCAN, json!({ "scan_id": scan_id }))
    }

    pub fn get_active_scans(&self) -> bool {
        self.send(outbound::GET_ACTIVE_SCANS, json!({}))
    }

    pub fn subscribe_updates(&self, settings: &SubscriptionSettings) -> bool {
        match serde_json::to_value(settings) {
            Ok(payload) => self.send(outbound::SUBSCRIBE_UPDATES, payload),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode subscription settings");
                false
            }
        }
    }

    pub fn unsubscribe_updates(&self, settings: &SubscriptionSettings) -> bool {
        match serde_json::to_value(settings) {
            Ok(payload) => self.send(outbound::UNSUBSCRIBE_UPDATES, payload),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode subscription settings");
                false
            }
        }
    }

    // ===== Authentication =====

    /// Store credentials for future handshakes and send them now if connected
    pub fn set_auth(&self, auth: AuthData) -> bool {
        let payload = match serde_json::to_value(&auth) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode auth data");
                return false;
            }
        };
        self.with_state(|manager, state, outbox| {
            state.auth = Some(auth);
            manager.is_live(state)
                && manager.send_locked(state, outbound::AUTHENTICATE, payload, None, outbox)
        })
    }

    pub fn clear_auth(&self) -> bool {
        self.with_state(|manager, state, outbox| {
            state.auth = None;
            state.info.authenticated = false;
            state.info.permissions.clear();
            manager.is_live(state)
                && manager.send_locked(state, outbound::UNAUTHENTICATE, json!({}), None, outbox)
        })
    }

    // ===== Events =====

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.bus.on(kind, handler)
    }

    pub fn once<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.bus.once(kind, handler)
    }

    /// Remove one handler, or every handler for `kind`
    pub fn off(&self, kind: EventKind, id: Option<HandlerId>) {
        self.inner.bus.off(kind, id);
    }

    // ===== Accessors =====

    pub fn is_connected(&self) -> bool {
        let state = self.inner.state.lock();
        self.is_live(&state)
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.state.lock().info.connecting
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().info.state
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        let state = self.inner.state.lock();
        let mut info = state.info.clone();
        info.uptime_ms = millis(state.uptime());
        info
    }

    /// Counter snapshot; uptime fields include the live connection
    pub fn stats(&self) -> Stats {
        let state = self.inner.state.lock();
        let mut stats = state.stats.clone();
        stats.current_uptime_ms = millis(state.uptime());
        stats.total_uptime_ms += stats.current_uptime_ms;
        stats
    }

    /// Time since the current connection was established
    pub fn uptime(&self) -> Duration {
        self.inner.state.lock().uptime()
    }

    pub fn current_scan_id(&self) -> Option<String> {
        self.inner.state.lock().current_scan_id.clone()
    }

    pub fn subscribed_rooms(&self) -> Vec<RoomKey> {
        self.inner.state.lock().rooms.iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn config(&self) -> ConnectionConfig {
        self.inner.state.lock().config.clone()
    }

    /// Diagnostic snapshot with credentials redacted
    pub fn debug_info(&self) -> DebugInfo {
        let registered_events = self.inner.bus.registered_kinds();
        let state = self.inner.state.lock();

        let mut connection = state.info.clone();
        connection.uptime_ms = millis(state.uptime());
        let mut stats = state.stats.clone();
        stats.current_uptime_ms = connection.uptime_ms;
        stats.total_uptime_ms += stats.current_uptime_ms;
        let mut config = state.config.clone();
        if config.auth.contains_key("token") {
            config
                .auth
                .insert("token".to_string(), Value::String("[HIDDEN]".to_string()));
        }

        DebugInfo {
            client_id: self.inner.client_id.clone(),
            transport: self.inner.transport.name(),
            state: state.info.state,
            connection,
            stats,
            config,
            auth: state.auth.as_ref().map(AuthData::redacted),
            queue_len: state.queue.len(),
            rooms: state.rooms.iter().map(ToString::to_string).collect(),
            current_scan_id: state.current_scan_id.clone(),
            reconnect_attempt: state.reconnect_attempt,
            outstanding_pings: state.pings.len(),
            registered_events,
        }
    }

    // ===== Maintenance =====

    /// Merge a partial config.
    ///
    /// Connection parameters apply from the next attempt; the queue bound
    /// applies immediately.
    pub fn update_config(&self, patch: ConfigPatch) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        state.config.merge(patch);
        state.info.url = state.config.connection_url();
        state.info.namespace = state.config.namespace.clone();

        let evicted = state.queue.set_capacity(state.config.max_queue_size);
        if evicted > 0 {
            state.stats.messages_dropped += evicted as u64;
            tracing::warn!(evicted, "Queue bound lowered, dropped oldest messages");
        }
    }

    /// Zero every counter and the latency window
    pub fn reset_stats(&self) {
        let mut state = self.inner.state.lock();
        state.stats = Stats::default();
        state.latency.clear();
        if state.info.connected {
            state.connected_since = Some(Instant::now());
        }
    }

    // ===== Internals =====

    fn with_state<R>(
        &self,
        f: impl FnOnce(&Self, &mut ManagerState, &mut Vec<Event>) -> R,
    ) -> R {
        let mut outbox = Vec::new();
        let result = {
            let mut guard = self.inner.state.lock();
            f(self, &mut guard, &mut outbox)
        };
        self.inner.publish(outbox);
        result
    }

    fn is_live(&self, state: &ManagerState) -> bool {
        state.info.connected && self.inner.transport.is_connected()
    }

    fn begin_connect(
        &self,
        state: &mut ManagerState,
        outbox: &mut Vec<Event>,
    ) -> Result<oneshot::Receiver<bool>, bool> {
        if state.info.connected {
            return Err(true);
        }

        let (sender, receiver) = oneshot::channel();
        state.waiters.push(sender);
        if state.info.connecting {
            return Ok(receiver);
        }

        // A manual connect restarts the retry budget
        state.reconnect_attempt = 0;
        self.start_attempt(state, outbox);
        Ok(receiver)
    }

    fn start_attempt(&self, state: &mut ManagerState, outbox: &mut Vec<Event>) {
        end_attempt(state);
        let epoch = state.epoch;
        state.info.mark_connecting();

        if state.config.enable_logging {
            tracing::info!(
                url = %state.info.url,
                attempt = state.reconnect_attempt,
                transport = self.inner.transport.name(),
                "Connecting"
            );
        }

        let request = build_request(state);
        let (sender, receiver) = mpsc::unbounded_channel();
        let opened = match Handle::try_current() {
            Ok(_) => self.inner.transport.connect(request, sender),
            Err(_) => Err(TransportError::Unavailable("no tokio runtime".to_string())),
        };

        if let Err(e) = opened {
            let err = ConnectionError::from(e);
            let message = err.to_string();
            tracing::error!(error = %message, "Connection could not be started");
            state.info.mark_disconnected();
            state.stats.record_error(&message);
            outbox.push(error_event(&message, None));
            state.settle_waiters(false);
            return;
        }

        state.stats.total_connections += 1;

        let weak = Arc::downgrade(&self.inner);
        state.timers.pump = spawn_task(pump(weak.clone(), epoch, receiver));

        let timeout = state.config.timeout();
        state.timers.connect_timeout = spawn_task(async move {
            tokio::time::sleep(timeout).await;
            if let Some(manager) = upgrade(&weak) {
                manager.handle_connect_timeout(epoch);
            }
        });
    }

    /// Returns false once the pump for `epoch` should stop
    fn handle_transport_event(&self, epoch: u64, event: TransportEvent) -> bool {
        let mut outbox = Vec::new();
        let keep = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.epoch != epoch {
                false
            } else {
                match event {
                    TransportEvent::Connect {
                        session_id,
                        transport,
                    } => {
                        self.on_transport_connect(state, session_id, transport, &mut outbox);
                        true
                    }
                    TransportEvent::Disconnect { reason } => {
                        self.on_transport_disconnect(state, reason, &mut outbox);
                        false
                    }
                    TransportEvent::ConnectError { message } => {
                        if state.info.connecting {
                            self.fail_attempt(state, ConnectionError::Connect(message), &mut outbox);
                            false
                        } else {
                            tracing::debug!(error = %message, "Ignoring connect error outside an attempt");
                            true
                        }
                    }
                    TransportEvent::Message { event, data } => {
                        self.on_server_message(state, event, data, &mut outbox);
                        true
                    }
                }
            }
        };
        self.inner.publish(outbox);
        keep
    }

    fn on_transport_connect(
        &self,
        state: &mut ManagerState,
        session_id: Option<String>,
        transport: Option<String>,
        outbox: &mut Vec<Event>,
    ) {
        if !state.info.connecting {
            tracing::debug!("Ignoring connect confirmation outside an attempt");
            return;
        }
        if let Some(handle) = state.timers.connect_timeout.take() {
            handle.abort();
        }

        state.info.mark_connected();
        state.info.id = session_id.clone();
        state.info.transport = transport.clone();
        state.stats.successful_connections += 1;
        state.connected_since = Some(Instant::now());
        state.reconnect_attempt = 0;

        if state.config.enable_logging {
            tracing::info!(
                url = %state.info.url,
                session_id = session_id.as_deref().unwrap_or("-"),
                "Connected"
            );
        }

        self.start_heartbeat(state);
        self.flush_queue(state, outbox);
        self.restore_rooms(state, outbox);

        outbox.push(client_event(
            EventKind::Connected,
            &ConnectedPayload {
                id: session_id,
                transport,
                timestamp: Utc::now(),
            },
        ));
        state.settle_waiters(true);
    }

    fn on_transport_disconnect(&self, state: &mut ManagerState, reason: String, outbox: &mut Vec<Event>) {
        if !state.info.connected {
            if state.info.connecting {
                self.fail_attempt(state, ConnectionError::Connect(reason), outbox);
            }
            return;
        }

        end_attempt(state);
        state.accumulate_uptime();
        state.info.mark_disconnected();
        state.info.id = None;
        state.pings.clear();

        if state.config.enable_logging {
            tracing::info!(url = %state.info.url, reason = %reason, "Disconnected");
        }

        let client_initiated = TransportEvent::is_client_disconnect(&reason);
        outbox.push(client_event(
            EventKind::Disconnected,
            &DisconnectedPayload {
                reason,
                timestamp: Utc::now(),
            },
        ));
        state.settle_waiters(false);

        if !client_initiated && state.config.reconnection {
            self.schedule_reconnect(state, outbox);
        }
    }

    fn handle_connect_timeout(&self, epoch: u64) {
        let mut outbox = Vec::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.epoch != epoch || !state.info.connecting {
                return;
            }
            state.timers.connect_timeout = None;
            self.fail_attempt(state, ConnectionError::Timeout, &mut outbox);
        }
        self.inner.publish(outbox);
    }

    fn fail_attempt(&self, state: &mut ManagerState, err: ConnectionError, outbox: &mut Vec<Event>) {
        end_attempt(state);
        self.inner.transport.disconnect();
        state.info.mark_disconnected();
        state.stats.failed_connections += 1;

        let message = err.to_string();
        tracing::warn!(url = %state.info.url, error = %message, "Connection attempt failed");
        state.stats.record_error(&message);
        outbox.push(error_event(&message, None));
        state.settle_waiters(false);

        if state.config.reconnection {
            self.schedule_reconnect(state, outbox);
        }
    }

    /// Arm the next retry, or move to `Error` once the budget is spent.
    ///
    /// The budget counts consecutive failed retries, not lifetime retries:
    /// `reconnect_attempt` resets after a successful connection and on a
    /// manual `connect()`.
    fn schedule_reconnect(&self, state: &mut ManagerState, outbox: &mut Vec<Event>) {
        let policy = ReconnectPolicy::from_config(&state.config);
        let attempts = state.reconnect_attempt;

        if policy.is_exhausted(attempts) {
            state.info.state = ConnectionState::Error;
            let message = ConnectionError::ReconnectExhausted { attempts }.to_string();
            tracing::error!(url = %state.info.url, attempts, "Giving up on reconnection");
            state.stats.record_error(&message);
            outbox.push(error_event(&message, Some(attempts)));
            return;
        }

        let delay = policy.delay_for(attempts);
        state.info.state = ConnectionState::Reconnecting;
        if state.config.enable_logging {
            tracing::info!(
                attempt = attempts + 1,
                delay_ms = millis(delay),
                "Scheduling reconnection"
            );
        }
        outbox.push(client_event(
            EventKind::Reconnecting,
            &ReconnectingPayload {
                attempt: attempts + 1,
                delay_ms: millis(delay),
                max_attempts: policy.max_attempts,
            },
        ));

        let epoch = state.epoch;
        let weak = Arc::downgrade(&self.inner);
        state.timers.reconnect = spawn_task(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = upgrade(&weak) {
                manager.fire_reconnect(epoch);
            }
        });
    }

    fn fire_reconnect(&self, epoch: u64) {
        let mut outbox = Vec::new();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.epoch != epoch || state.info.state != ConnectionState::Reconnecting {
                return;
            }
            state.timers.reconnect = None;
            state.reconnect_attempt += 1;
            state.info.total_reconnects += 1;
            state.stats.reconnect_attempts += 1;
            self.start_attempt(state, &mut outbox);
        }
        self.inner.publish(outbox);
    }

    fn start_heartbeat(&self, state: &mut ManagerState) {
        let Some(period) = state.config.heartbeat_interval() else {
            return;
        };
        let epoch = state.epoch;
        let weak = Arc::downgrade(&self.inner);
        state.timers.heartbeat = spawn_task(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = upgrade(&weak) else {
                    break;
                };
                if !manager.heartbeat(epoch) {
                    break;
                }
            }
        });
    }

    fn heartbeat(&self, epoch: u64) -> bool {
        let mut outbox = Vec::new();
        let alive = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.epoch != epoch || !state.info.connected {
                false
            } else {
                self.ping_locked(state, None, &mut outbox);
                true
            }
        };
        self.inner.publish(outbox);
        alive
    }

    fn flush_queue(&self, state: &mut ManagerState, outbox: &mut Vec<Event>) {
        let pending = state.queue.drain();
        if pending.is_empty() {
            return;
        }
        if state.config.enable_logging {
            tracing::info!(count = pending.len(), "Flushing queued messages");
        }
        for message in pending {
            self.emit_now(state, &message.event, message.data, message.ack, outbox);
        }
    }

    fn restore_rooms(&self, state: &mut ManagerState, outbox: &mut Vec<Event>) {
        let rooms: Vec<RoomKey> = state.rooms.iter().cloned().collect();
        for room in rooms {
            match room.room_type {
                RoomType::Scan => self.emit_now(
                    state,
                    outbound::JOIN_SCAN,
                    json!({ "scan_id": room.name }),
                    None,
                    outbox,
                ),
                room_type => self.emit_now(
                    state,
                    outbound::JOIN_ROOM,
                    room_payload(&room.name, room_type),
                    None,
                    outbox,
                ),
            };
        }
    }

    fn send_locked(
        &self,
        state: &mut ManagerState,
        event: &str,
        data: Value,
        ack: Option<AckCallback>,
        outbox: &mut Vec<Event>,
    ) -> bool {
        if self.is_live(state) {
            return self.emit_now(state, event, data, ack, outbox);
        }

        let evicted = state.queue.push(PendingMessage {
            event: event.to_string(),
            data,
            ack,
        });
        state.stats.messages_queued += 1;
        if let Some(dropped) = evicted {
            state.stats.messages_dropped += 1;
            tracing::warn!(
                event = %dropped.event,
                capacity = state.queue.capacity(),
                "Offline queue full, dropped oldest message"
            );
        }
        false
    }

    fn emit_now(
        &self,
        state: &mut ManagerState,
        event: &str,
        data: Value,
        ack: Option<AckCallback>,
        outbox: &mut Vec<Event>,
    ) -> bool {
        if state.config.debug {
            tracing::debug!(event, data = %data, "Emitting");
        }
        match self.inner.transport.emit(event, data, ack) {
            Ok(()) => {
                state.stats.messages_sent += 1;
                state.stats.total_messages += 1;
                true
            }
            Err(e) => {
                let message = ConnectionError::Send(e.to_string()).to_string();
                tracing::warn!(event, error = %message, "Send failed");
                state.stats.record_error(&message);
                outbox.push(error_event(&message, None));
                false
            }
        }
    }

    fn ping_locked(&self, state: &mut ManagerState, extra: Option<Value>, outbox: &mut Vec<Event>) -> bool {
        if !self.is_live(state) {
            return false;
        }

        state.next_ping_id += 1;
        let ping_id = state.next_ping_id;
        let ping = PingPong {
            client_time: Utc::now().to_rfc3339(),
            client_id: Some(self.inner.client_id.clone()),
            uptime: Some(millis(state.uptime())),
            ping_id: Some(ping_id),
            ..Default::default()
        };
        let mut payload = match serde_json::to_value(&ping) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        // Caller fields win, except the correlation id
        if let Some(Value::Object(extra)) = extra {
            for (key, value) in extra {
                if key != "ping_id" {
                    payload.insert(key, value);
                }
            }
        }

        if !self.emit_now(state, outbound::PING, Value::Object(payload), None, outbox) {
            return false;
        }
        state.pings.push_back(OutstandingPing {
            id: ping_id,
            sent_at: Instant::now(),
        });
        while state.pings.len() > MAX_OUTSTANDING_PINGS {
            state.pings.pop_front();
        }
        true
    }

    fn on_server_message(&self, state: &mut ManagerState, event: String, data: Value, outbox: &mut Vec<Event>) {
        let Some(kind) = relay_kind(&event) else {
            tracing::debug!(event = %event, "Ignoring unknown server event");
            return;
        };
        state.stats.messages_received += 1;
        state.stats.total_messages += 1;

        match event.as_str() {
            inbound::CONNECTED => {
                if let Ok(hello) = ServerHello::deserialize(&data) {
                    state.info.authenticated = hello.authenticated;
                    state.info.permissions = hello.permissions;
                }
            }
            inbound::JOIN_SUCCESS => {
                if let Some(scan_id) = scan_id_of(&data) {
                    state.rooms.insert(RoomKey::scan(scan_id.as_str()));
                    state.current_scan_id = Some(scan_id);
                }
            }
            inbound::LEAVE_SUCCESS => {
                if let Some(scan_id) = scan_id_of(&data) {
                    state.rooms.remove(&RoomKey::scan(scan_id.as_str()));
                    if state.current_scan_id.as_deref() == Some(scan_id.as_str()) {
                        state.current_scan_id = None;
                    }
                }
            }
            inbound::PONG => {
                outbox.push(Event::server(kind, self.on_pong(state, data)));
                return;
            }
            inbound::ERROR => {
                let message = error_text(&data);
                tracing::warn!(error = %message, "Server reported an error");
                state.stats.record_error(&message);
            }
            _ => {}
        }

        outbox.push(Event::server(kind, data));
    }

    /// Match a pong to its ping and return the `pong_received` payload
    fn on_pong(&self, state: &mut ManagerState, data: Value) -> Value {
        let matched = match data.get("ping_id").and_then(Value::as_u64) {
            Some(id) => state
                .pings
                .iter()
                .position(|ping| ping.id == id)
                .and_then(|idx| state.pings.remove(idx)),
            None => state.pings.pop_front(),
        };

        let latency = matched.map(|ping| millis(ping.sent_at.elapsed()));
        if let Some(latency_ms) = latency {
            state.stats.record_latency(&mut state.latency, latency_ms);
        }

        match data {
            Value::Object(mut map) => {
                map.insert("latency".to_string(), json!(latency));
                Value::Object(map)
            }
            other => json!({ "latency": latency, "data": other }),
        }
    }
}

/// End the current attempt or connection: stale epochs are ignored from now on
fn end_attempt(state: &mut ManagerState) {
    state.epoch += 1;
    state.timers.abort_all();
}

async fn pump(
    inner: Weak<Inner>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = upgrade(&inner) else {
            break;
        };
        if !manager.handle_transport_event(epoch, event) {
            break;
        }
    }
}

fn upgrade(inner: &Weak<Inner>) -> Option<ConnectionManager> {
    inner.upgrade().map(|inner| ConnectionManager { inner })
}

fn spawn_task<F>(future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    Handle::try_current().ok().map(|handle| handle.spawn(future))
}

fn build_request(state: &ManagerState) -> ConnectRequest {
    let config = &state.config;

    let mut query = config.query.clone();
    query.insert("version".to_string(), CLIENT_VERSION.to_string());
    query.insert("client".to_string(), CLIENT_NAME.to_string());
    query.insert(
        "timestamp".to_string(),
        Utc::now().timestamp_millis().to_string(),
    );

    let mut auth = config.auth.clone();
    if let Some(data) = &state.auth {
        if let Some(token) = &data.token {
            query.insert("auth_token".to_string(), token.clone());
        }
        if let Ok(Value::Object(map)) = serde_json::to_value(data) {
            auth.extend(map);
        }
    }

    ConnectRequest {
        url: config.url.clone(),
        namespace: config.namespace.clone(),
        transports: config.transports.clone(),
        timeout: config.timeout(),
        upgrade: config.upgrade,
        force_new: config.force_new,
        compression: config.compression,
        query,
        auth,
    }
}

fn valid_id(operation: &str, id: &str) -> bool {
    if id.trim().is_empty() {
        let err = ConnectionError::InvalidArgument(format!("{} requires a non-empty id", operation));
        tracing::warn!(error = %err, "Rejected request");
        return false;
    }
    true
}

fn room_payload(room: &str, room_type: RoomType) -> Value {
    json!({ "room": room, "type": room_type })
}

fn scan_id_of(data: &Value) -> Option<String> {
    data.get("scan_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn error_text(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .or_else(|| data.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string())
}

fn client_event<T: Serialize>(kind: EventKind, payload: &T) -> Event {
    Event::client(kind, serde_json::to_value(payload).unwrap_or(Value::Null))
}

fn error_event(message: &str, attempts: Option<u32>) -> Event {
    client_event(
        EventKind::Error,
        &ErrorPayload {
            message: message.to_string(),
            timestamp: Utc::now(),
            attempts,
        },
    )
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
