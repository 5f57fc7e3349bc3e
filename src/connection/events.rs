//! Typed Event Bus
//!
//! In-process pub/sub over a fixed catalogue of event kinds. Handlers run
//! in registration order over a snapshot of the registry, so a handler may
//! unsubscribe itself (or anyone else) while an event is being dispatched.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Application-level events delivered to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    ServerConnected,
    ScanProgress,
    ScanCompleted,
    ScanStopped,
    ScanError,
    ScanStatus,
    ScanJoined,
    ScanLeft,
    ScanNotFound,
    ActiveScans,
    Notification,
    SystemMessage,
    PongReceived,
    ServerError,
    Error,
    Reconnecting,
    RateLimit,
}

impl EventKind {
    pub const ALL: [EventKind; 19] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::ServerConnected,
        EventKind::ScanProgress,
        EventKind::ScanCompleted,
        EventKind::ScanStopped,
        EventKind::ScanError,
        EventKind::ScanStatus,
        EventKind::ScanJoined,
        EventKind::ScanLeft,
        EventKind::ScanNotFound,
        EventKind::ActiveScans,
        EventKind::Notification,
        EventKind::SystemMessage,
        EventKind::PongReceived,
        EventKind::ServerError,
        EventKind::Error,
        EventKind::Reconnecting,
        EventKind::RateLimit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::ServerConnected => "server_connected",
            EventKind::ScanProgress => "scan_progress",
            EventKind::ScanCompleted => "scan_completed",
            EventKind::ScanStopped => "scan_stopped",
            EventKind::ScanError => "scan_error",
            EventKind::ScanStatus => "scan_status",
            EventKind::ScanJoined => "scan_joined",
            EventKind::ScanLeft => "scan_left",
            EventKind::ScanNotFound => "scan_not_found",
            EventKind::ActiveScans => "active_scans",
            EventKind::Notification => "notification",
            EventKind::SystemMessage => "system_message",
            EventKind::PongReceived => "pong_received",
            EventKind::ServerError => "server_error",
            EventKind::Error => "error",
            EventKind::Reconnecting => "reconnecting",
            EventKind::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {}", s))
    }
}

/// Who produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Raised by the manager itself (lifecycle, errors)
    Client,
    /// Relayed from the server
    Server,
}

/// An event as seen by handlers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
}

impl Event {
    pub fn new(kind: EventKind, data: Value, source: EventSource) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
            source,
        }
    }

    pub fn client(kind: EventKind, data: Value) -> Self {
        Self::new(kind, data, EventSource::Client)
    }

    pub fn server(kind: EventKind, data: Value) -> Self {
        Self::new(kind, data, EventSource::Server)
    }

    /// Deserialize the payload into a typed message
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Identifies one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(HandlerId, Handler)>>,
}

impl Registry {
    fn allocate(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    fn remove(&mut self, kind: EventKind, id: HandlerId) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(&kind);
        }
        removed
    }
}

/// Handle returned by [`EventBus::on`] and [`EventBus::once`]
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    kind: EventKind,
    id: HandlerId,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Remove the handler; returns false if it was already gone
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.lock().remove(self.kind, self.id),
            None => false,
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .handlers
            .iter()
            .map(|(kind, list)| (kind.as_str(), list.len()))
            .collect();
        f.debug_struct("Registry").field("handlers", &counts).finish()
    }
}

/// Multi-writer handler registry with snapshot dispatch
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `kind`
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.allocate();
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        self.subscription(kind, id)
    }

    /// Register a handler that fires at most once
    pub fn once<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.allocate();
        let weak = Arc::downgrade(&self.registry);
        let fired = AtomicBool::new(false);

        let wrapped = move |event: &Event| {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(registry) = weak.upgrade() {
                registry.lock().remove(kind, id);
            }
            handler(event);
        };

        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(wrapped)));
        self.subscription(kind, id)
    }

    /// Remove one handler, or every handler for `kind` when `id` is `None`
    pub fn off(&self, kind: EventKind, id: Option<HandlerId>) {
        let mut registry = self.registry.lock();
        match id {
            Some(id) => {
                registry.remove(kind, id);
            }
            None => {
                registry.handlers.remove(&kind);
            }
        }
    }

    /// Remove every handler
    pub fn clear(&self) {
        self.registry.lock().handlers.clear();
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.registry
            .lock()
            .handlers
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Kinds with at least one handler, in catalogue order
    pub fn registered_kinds(&self) -> Vec<EventKind> {
        let registry = self.registry.lock();
        EventKind::ALL
            .iter()
            .copied()
            .filter(|kind| registry.handlers.contains_key(kind))
            .collect()
    }

    /// Invoke every handler for the event's kind.
    ///
    /// Returns one message per handler that panicked.
    pub fn dispatch(&self, event: &Event) -> Vec<String> {
        let snapshot: Vec<Handler> = {
            let registry = self.registry.lock();
            match registry.handlers.get(&event.kind) {
                Some(list) => list.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
                None => return Vec::new(),
            }
        };

        let mut failures = Vec::new();
        for handler in snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (*handler)(event))) {
                failures.push(panic_message(payload.as_ref()));
            }
        }
        failures
    }

    fn subscription(&self, kind: EventKind, id: HandlerId) -> Subscription {
        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &Event| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_event_kind_round_trips_through_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("heartbeat".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_handlers_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.on(EventKind::Notification, move |_| order.lock().push(label));
        }

        bus.dispatch(&Event::server(EventKind::Notification, json!({})));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        let subscription = bus.on(EventKind::ScanProgress, handler);

        bus.dispatch(&Event::server(EventKind::ScanProgress, json!({})));
        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        bus.dispatch(&Event::server(EventKind::ScanProgress, json!({})));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(EventKind::ScanProgress), 0);
    }

    #[test]
    fn test_once_fires_once() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.once(EventKind::Connected, handler);

        for _ in 0..3 {
            bus.dispatch(&Event::client(EventKind::Connected, json!({})));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(EventKind::Connected), 0);
    }

    #[test]
    fn test_off_without_id_clears_kind() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.on(EventKind::Error, handler);
        bus.on(EventKind::Error, |_| {});
        bus.on(EventKind::RateLimit, |_| {});

        bus.off(EventKind::Error, None);
        bus.dispatch(&Event::client(EventKind::Error, json!({})));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.registered_kinds(), vec![EventKind::RateLimit]);
    }

    #[test]
    fn test_handler_can_remove_itself_during_dispatch() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_for_handler = Arc::clone(&slot);
        let subscription = bus.on(EventKind::ScanStatus, move |_| {
            if let Some(sub) = slot_for_handler.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(subscription);
        bus.on(EventKind::ScanStatus, handler);

        bus.dispatch(&Event::server(EventKind::ScanStatus, json!({})));
        bus.dispatch(&Event::server(EventKind::ScanStatus, json!({})));

        // The second handler still ran for both events
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(bus.handler_count(EventKind::ScanStatus), 1);
    }

    #[test]
    fn test_panicking_handler_is_reported_and_others_still_run() {
        let bus = EventBus::new();
        let (count, handler) = counter();
        bus.on(EventKind::ScanCompleted, |_| panic!("render failed"));
        bus.on(EventKind::ScanCompleted, handler);

        let failures = bus.dispatch(&Event::server(EventKind::ScanCompleted, json!({})));
        assert_eq!(failures, vec!["render failed".to_string()]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_decode() {
        #[derive(serde::Deserialize)]
        struct Payload {
            scan_id: String,
        }
        let event = Event::server(EventKind::ScanStopped, json!({"scan_id": "s9"}));
        let payload: Payload = event.decode().unwrap();
        assert_eq!(payload.scan_id, "s9");
    }
}
