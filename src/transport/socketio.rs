//! Socket.IO Packet Codec
//!
//! Text framing for Engine.IO v4 and Socket.IO v5.
//!
//! Engine.IO frames are a single type digit followed by a payload:
//! `0` open, `1` close, `2` ping, `3` pong, `4` message, `5` upgrade, `6` noop.
//!
//! Socket.IO packets travel inside Engine.IO `4` frames:
//! `<type>[<namespace>,][<ack id>][<json>]`. Binary packets (types 5 and 6)
//! are not supported.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TransportError;

/// Root namespace, omitted from encoded packets
pub const ROOT_NAMESPACE: &str = "/";

/// Handshake payload carried by the Engine.IO open packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Engine.IO transport-level packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    /// Decode a single text frame
    pub fn decode(frame: &str) -> Result<Self, TransportError> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| TransportError::Protocol("empty engine packet".to_string()))?;
        let payload = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(payload)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(payload.to_string())),
            '3' => Ok(EnginePacket::Pong(payload.to_string())),
            '4' => Ok(EnginePacket::Message(payload.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(TransportError::Protocol(format!(
                "unknown engine packet type '{}'",
                other
            ))),
        }
    }

    /// Encode as a text frame
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(payload) => format!("2{}", payload),
            EnginePacket::Pong(payload) => format!("3{}", payload),
            EnginePacket::Message(payload) => format!("4{}", payload),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO namespace-level packet
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        data: Value,
    },
    Ack {
        namespace: String,
        id: u64,
        data: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Value,
    },
}

impl SocketPacket {
    /// Namespace this packet belongs to
    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Decode the payload of an Engine.IO message frame
    pub fn decode(input: &str) -> Result<Self, TransportError> {
        let mut chars = input.chars();
        let kind = chars
            .next()
            .ok_or_else(|| TransportError::Protocol("empty socket packet".to_string()))?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(TransportError::Protocol(
                "binary packets are not supported".to_string(),
            ));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let ns = &rest[..idx];
                    rest = &rest[idx + 1..];
                    ns.to_string()
                }
                None => {
                    let ns = rest.to_string();
                    rest = "";
                    ns
                }
            }
        } else {
            ROOT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|e| TransportError::Protocol(format!("invalid ack id: {}", e)))?,
            )
        } else {
            None
        };
        rest = &rest[digits..];

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace, data }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut items = match data {
                    Some(Value::Array(items)) if !items.is_empty() => items,
                    _ => {
                        return Err(TransportError::Protocol(
                            "event packet without event name".to_string(),
                        ))
                    }
                };
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(TransportError::Protocol(format!(
                            "event name must be a string, got {}",
                            other
                        )))
                    }
                };
                let data = if items.is_empty() {
                    Value::Null
                } else {
                    items.remove(0)
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    data,
                })
            }
            '3' => {
                let id = id
                    .ok_or_else(|| TransportError::Protocol("ack packet without id".to_string()))?;
                let data = match data {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                Ok(SocketPacket::Ack {
                    namespace,
                    id,
                    data,
                })
            }
            '4' => Ok(SocketPacket::ConnectError {
                namespace,
                data: data.unwrap_or(Value::Null),
            }),
            other => Err(TransportError::Protocol(format!(
                "unknown socket packet type '{}'",
                other
            ))),
        }
    }

    /// Encode as the payload of an Engine.IO message frame
    pub fn encode(&self) -> String {
        let (kind, id, data) = match self {
            SocketPacket::Connect { data, .. } => ('0', None, data.clone()),
            SocketPacket::Disconnect { .. } => ('1', None, None),
            SocketPacket::Event { id, name, data, .. } => (
                '2',
                *id,
                Some(Value::Array(vec![Value::String(name.clone()), data.clone()])),
            ),
            SocketPacket::Ack { id, data, .. } => ('3', Some(*id), Some(Value::Array(data.clone()))),
            SocketPacket::ConnectError { data, .. } => ('4', None, Some(data.clone())),
        };

        let mut out = String::new();
        out.push(kind);

        let namespace = self.namespace();
        if namespace != ROOT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = data {
            out.push_str(&data.to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open_packet() {
        let frame = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        match EnginePacket::decode(frame).unwrap() {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
                assert_eq!(handshake.ping_interval, 25000);
                assert_eq!(handshake.max_payload, Some(1000000));
            }
            other => panic!("Expected Open, got {:?}", other),
        }
    }

    #[test]
    fn test_engine_ping_pong() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("9").is_err());
    }

    #[test]
    fn test_encode_connect_with_namespace_and_auth() {
        let packet = SocketPacket::Connect {
            namespace: "/scan-progress".to_string(),
            data: Some(json!({"token": "abc"})),
        };
        assert_eq!(packet.encode(), r#"0/scan-progress,{"token":"abc"}"#);
    }

    #[test]
    fn test_encode_event_root_namespace_with_ack() {
        let packet = SocketPacket::Event {
            namespace: "/".to_string(),
            id: Some(12),
            name: "join_scan".to_string(),
            data: json!({"scan_id": "abc"}),
        };
        assert_eq!(packet.encode(), r#"212["join_scan",{"scan_id":"abc"}]"#);
    }

    #[test]
    fn test_decode_event_in_namespace() {
        let packet =
            SocketPacket::decode(r#"2/scan-progress,["scan_progress",{"scan_id":"s1","progress":40}]"#)
                .unwrap();
        match packet {
            SocketPacket::Event {
                namespace,
                id,
                name,
                data,
            } => {
                assert_eq!(namespace, "/scan-progress");
                assert_eq!(id, None);
                assert_eq!(name, "scan_progress");
                assert_eq!(data["progress"], 40);
            }
            other => panic!("Expected Event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_connect_ack_and_errors() {
        let connect = SocketPacket::decode(r#"0/scan-progress,{"sid":"xyz"}"#).unwrap();
        assert_eq!(
            connect,
            SocketPacket::Connect {
                namespace: "/scan-progress".to_string(),
                data: Some(json!({"sid": "xyz"})),
            }
        );

        let ack = SocketPacket::decode(r#"3/scan-progress,7[{"ok":true}]"#).unwrap();
        assert_eq!(
            ack,
            SocketPacket::Ack {
                namespace: "/scan-progress".to_string(),
                id: 7,
                data: vec![json!({"ok": true})],
            }
        );

        let err = SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap();
        assert_eq!(err.namespace(), "/");

        assert_eq!(
            SocketPacket::decode("1/scan-progress,").unwrap(),
            SocketPacket::Disconnect {
                namespace: "/scan-progress".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_malformed_packets() {
        assert!(SocketPacket::decode("").is_err());
        assert!(SocketPacket::decode("2[]").is_err());
        assert!(SocketPacket::decode("2[42]").is_err());
        assert!(SocketPacket::decode("3[]").is_err());
        assert!(SocketPacket::decode(r#"51-["upload",{"_placeholder":true,"num":0}]"#).is_err());
    }

    #[test]
    fn test_event_without_payload_decodes_null() {
        match SocketPacket::decode(r#"2["get_active_scans"]"#).unwrap() {
            SocketPacket::Event { data, .. } => assert_eq!(data, Value::Null),
            other => panic!("Expected Event, got {:?}", other),
        }
    }
}
