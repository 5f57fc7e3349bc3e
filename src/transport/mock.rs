//! Scripted in-memory transport for tests

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use super::{
    AckCallback, ConnectRequest, Transport, TransportError, TransportEvent, TransportEventSender,
    CLIENT_DISCONNECT_REASON,
};

#[derive(Default)]
struct MockState {
    events: Option<TransportEventSender>,
    connected: bool,
    unavailable: bool,
    fail_emit: bool,
    emitted: Vec<(String, Value)>,
    acks: Vec<AckCallback>,
    requests: Vec<ConnectRequest>,
    disconnect_calls: usize,
}

/// Transport whose server side is driven by the test
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport whose `connect` always reports it is unavailable
    pub fn unavailable() -> Arc<Self> {
        let transport = Self::default();
        transport.state.lock().unavailable = true;
        Arc::new(transport)
    }

    pub fn set_fail_emit(&self, fail: bool) {
        self.state.lock().fail_emit = fail;
    }

    fn push(&self, event: TransportEvent) {
        let state = self.state.lock();
        if let Some(events) = &state.events {
            let _ = events.send(event);
        }
    }

    /// Server accepts the pending connection
    pub fn accept(&self, session_id: &str) {
        self.state.lock().connected = true;
        self.push(TransportEvent::Connect {
            session_id: Some(session_id.to_string()),
            transport: Some("websocket".to_string()),
        });
    }

    /// Server rejects the pending connection
    pub fn reject(&self, message: &str) {
        self.push(TransportEvent::ConnectError {
            message: message.to_string(),
        });
    }

    /// Connection drops after being established
    pub fn drop_connection(&self, reason: &str) {
        self.state.lock().connected = false;
        self.push(TransportEvent::Disconnect {
            reason: reason.to_string(),
        });
    }

    /// Server emits an application event
    pub fn server_event(&self, event: &str, data: Value) {
        self.push(TransportEvent::Message {
            event: event.to_string(),
            data,
        });
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.state.lock().emitted.clone()
    }

    pub fn emitted_names(&self) -> Vec<String> {
        self.state
            .lock()
            .emitted
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn clear_emitted(&self) {
        self.state.lock().emitted.clear();
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.state.lock().requests.last().cloned()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().disconnect_calls
    }

    /// Invoke every stored acknowledgement callback with `value`
    pub fn acknowledge_all(&self, value: Value) {
        let acks: Vec<AckCallback> = self.state.lock().acks.drain(..).collect();
        for ack in acks {
            ack(value.clone());
        }
    }
}

impl Transport for MockTransport {
    fn connect(
        &self,
        request: ConnectRequest,
        events: TransportEventSender,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(TransportError::Unavailable("mock transport disabled".to_string()));
        }
        state.connected = false;
        state.events = Some(events);
        state.requests.push(request);
        Ok(())
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        state.disconnect_calls += 1;
        if state.connected {
            state.connected = false;
            if let Some(events) = &state.events {
                let _ = events.send(TransportEvent::Disconnect {
                    reason: CLIENT_DISCONNECT_REASON.to_string(),
                });
            }
        }
    }

    fn emit(
        &self,
        event: &str,
        data: Value,
        ack: Option<AckCallback>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_emit {
            return Err(TransportError::Send("mock emit failure".to_string()));
        }
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.emitted.push((event.to_string(), data));
        if let Some(ack) = ack {
            state.acks.push(ack);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
