//! WebSocket Transport
//!
//! Socket.IO client transport over `tokio-tungstenite`.
//!
//! Each `connect` call spawns one session task that owns the socket. The
//! task answers Engine.IO pings, performs the namespace handshake, routes
//! acknowledgements and forwards everything else to the manager.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::socketio::{EnginePacket, SocketPacket};
use super::{
    AckCallback, ConnectRequest, Transport, TransportError, TransportEvent, TransportEventSender,
    CLIENT_DISCONNECT_REASON,
};

/// Name reported for sessions opened by this transport
pub const WEBSOCKET_TRANSPORT: &str = "websocket";

type AckRegistry = Arc<Mutex<HashMap<u64, AckCallback>>>;

/// Socket.IO transport speaking WebSocket frames only
#[derive(Default)]
pub struct WebSocketTransport {
    session: Mutex<Option<Session>>,
}

/// Handle to one running session task
struct Session {
    outbound: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    acks: AckRegistry,
    next_ack_id: u64,
    namespace: String,
}

/// State moved into the session task
struct SessionContext {
    url: String,
    namespace: String,
    auth: Map<String, Value>,
    events: TransportEventSender,
    connected: Arc<AtomicBool>,
    acks: AckRegistry,
}

/// What the session loop should do after handling a frame
enum FrameOutcome {
    Continue,
    Reply(String),
    /// Stop the session; `None` means the outcome was already reported
    Stop(Option<String>),
}

impl WebSocketTransport {
    /// Create a transport with no open session
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WebSocketTransport {
    fn connect(
        &self,
        request: ConnectRequest,
        events: TransportEventSender,
    ) -> Result<(), TransportError> {
        if !request
            .transports
            .iter()
            .any(|t| t.eq_ignore_ascii_case(WEBSOCKET_TRANSPORT))
        {
            return Err(TransportError::Unavailable(
                "websocket transport is not enabled".to_string(),
            ));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| TransportError::Unavailable("no tokio runtime".to_string()))?;

        // A new connect always replaces the previous session
        self.disconnect();

        let url = engine_url(&request.url, &request.query);
        let connected = Arc::new(AtomicBool::new(false));
        let acks: AckRegistry = Arc::new(Mutex::new(HashMap::new()));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let context = SessionContext {
            url,
            namespace: request.namespace.clone(),
            auth: request.auth,
            events,
            connected: Arc::clone(&connected),
            acks: Arc::clone(&acks),
        };

        tracing::debug!(url = %context.url, namespace = %context.namespace, "Opening WebSocket session");
        runtime.spawn(run_session(context, outbound_rx));

        *self.session.lock() = Some(Session {
            outbound: outbound_tx,
            connected,
            acks,
            next_ack_id: 0,
            namespace: request.namespace,
        });

        Ok(())
    }

    fn disconnect(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        if session.connected.load(Ordering::SeqCst) {
            let packet = SocketPacket::Disconnect {
                namespace: session.namespace.clone(),
            };
            let _ = session
                .outbound
                .send(EnginePacket::Message(packet.encode()).encode());
        }
        session.acks.lock().clear();
        // Dropping the sender closes the session task
    }

    fn emit(
        &self,
        event: &str,
        data: Value,
        ack: Option<AckCallback>,
    ) -> Result<(), TransportError> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(TransportError::NotConnected)?;
        if !session.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let id = ack.map(|callback| {
            session.next_ack_id += 1;
            session.acks.lock().insert(session.next_ack_id, callback);
            session.next_ack_id
        });

        let packet = SocketPacket::Event {
            namespace: session.namespace.clone(),
            id,
            name: event.to_string(),
            data,
        };

        session
            .outbound
            .send(EnginePacket::Message(packet.encode()).encode())
            .map_err(|_| TransportError::Send("session closed".to_string()))
    }

    fn is_connected(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        WEBSOCKET_TRANSPORT
    }
}

/// Build the Engine.IO handshake URL
///
/// `http(s)://` bases are rewritten to `ws(s)://`.
pub fn engine_url(base: &str, query: &BTreeMap<String, String>) -> String {
    let base = base
        .trim_end_matches('/')
        .replace("http://", "ws://")
        .replace("https://", "wss://");

    let mut url = format!("{}/socket.io/?EIO=4&transport=websocket", base);
    for (key, value) in query {
        url.push('&');
        url.push_str(&urlencoding::encode(key));
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

/// Session task: owns the socket until either side closes it
async fn run_session(context: SessionContext, mut outbound: mpsc::UnboundedReceiver<String>) {
    let stream = match tokio_tungstenite::connect_async(context.url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket handshake failed");
            let _ = context.events.send(TransportEvent::ConnectError {
                message: e.to_string(),
            });
            return;
        }
    };

    let (mut write, mut read) = stream.split();

    let reason: Option<String> = loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match handle_frame(&context, &text) {
                    FrameOutcome::Continue => {}
                    FrameOutcome::Reply(reply) => {
                        if let Err(e) = write.send(Message::Text(reply)).await {
                            tracing::warn!(error = %e, "WebSocket write failed");
                            break Some("transport error".to_string());
                        }
                    }
                    FrameOutcome::Stop(reason) => break reason,
                },
                Some(Ok(Message::Close(_))) | None => break Some("transport close".to_string()),
                Some(Ok(_)) => {} // Binary and control frames are not part of the text protocol
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break Some("transport error".to_string());
                }
            },
            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        tracing::warn!(error = %e, "WebSocket write failed");
                        break Some("transport error".to_string());
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break Some(CLIENT_DISCONNECT_REASON.to_string());
                }
            },
        }
    };

    let was_connected = context.connected.swap(false, Ordering::SeqCst);
    context.acks.lock().clear();

    if let Some(reason) = reason {
        let event = if was_connected {
            TransportEvent::Disconnect { reason }
        } else {
            TransportEvent::ConnectError { message: reason }
        };
        let _ = context.events.send(event);
    }

    tracing::debug!("WebSocket session closed");
}

/// Handle one inbound text frame
fn handle_frame(context: &SessionContext, frame: &str) -> FrameOutcome {
    let packet = match EnginePacket::decode(frame) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed engine packet");
            return FrameOutcome::Continue;
        }
    };

    match packet {
        EnginePacket::Open(handshake) => {
            tracing::debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "Engine.IO handshake");
            let auth = if context.auth.is_empty() {
                None
            } else {
                Some(Value::Object(context.auth.clone()))
            };
            let connect = SocketPacket::Connect {
                namespace: context.namespace.clone(),
                data: auth,
            };
            FrameOutcome::Reply(EnginePacket::Message(connect.encode()).encode())
        }
        EnginePacket::Ping(payload) => FrameOutcome::Reply(EnginePacket::Pong(payload).encode()),
        EnginePacket::Close => FrameOutcome::Stop(Some("transport close".to_string())),
        EnginePacket::Message(payload) => handle_socket_packet(context, &payload),
        EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => FrameOutcome::Continue,
    }
}

fn handle_socket_packet(context: &SessionContext, payload: &str) -> FrameOutcome {
    let packet = match SocketPacket::decode(payload) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed socket packet");
            return FrameOutcome::Continue;
        }
    };

    if packet.namespace() != context.namespace {
        tracing::trace!(namespace = %packet.namespace(), "Ignoring packet for another namespace");
        return FrameOutcome::Continue;
    }

    match packet {
        SocketPacket::Connect { data, .. } => {
            context.connected.store(true, Ordering::SeqCst);
            let session_id = data
                .as_ref()
                .and_then(|d| d.get("sid"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let _ = context.events.send(TransportEvent::Connect {
                session_id,
                transport: Some(WEBSOCKET_TRANSPORT.to_string()),
            });
            FrameOutcome::Continue
        }
        SocketPacket::ConnectError { data, .. } => {
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| data.to_string());
            let _ = context.events.send(TransportEvent::ConnectError { message });
            FrameOutcome::Stop(None)
        }
        SocketPacket::Disconnect { .. } => FrameOutcome::Stop(Some("io server disconnect".to_string())),
        SocketPacket::Event { name, data, .. } => {
            let _ = context.events.send(TransportEvent::Message { event: name, data });
            FrameOutcome::Continue
        }
        SocketPacket::Ack { id, data, .. } => {
            let callback = context.acks.lock().remove(&id);
            match callback {
                Some(callback) => callback(data.into_iter().next().unwrap_or(Value::Null)),
                None => tracing::debug!(ack_id = id, "Acknowledgement for unknown id"),
            }
            FrameOutcome::Continue
        }
    }
}
