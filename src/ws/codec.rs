//! Text framing for the backend realtime endpoint.
//!
//! The backend speaks Socket.IO v5 over an Engine.IO v4 websocket. Only the
//! text packets on the default namespace are supported; binary attachments
//! are rejected.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type '{0}'")]
    UnknownType(char),
    #[error("namespace '{0}' is not supported")]
    UnsupportedNamespace(String),
    #[error("binary packets are not supported")]
    Binary,
    #[error("invalid JSON payload: {0}")]
    Json(String),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

/// Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Value),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Noop,
}

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { ack: Option<u64>, name: String, data: Vec<Value> },
    Ack { id: u64, data: Vec<Value> },
    ConnectError(Value),
}

impl Packet {
    pub fn event(name: &str, data: Value, ack: Option<u64>) -> Self {
        Packet::Message(SocketPacket::Event { ack, name: name.to_string(), data: vec![data] })
    }

    pub fn encode(&self) -> String {
        match self {
            Packet::Open(v) => format!("0{}", v),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Message(p) => format!("4{}", p.encode()),
            Packet::Noop => "6".to_string(),
        }
    }

    pub fn decode(frame: &str) -> Result<Self, CodecError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(Packet::Open(parse_json(rest)?)),
            '1' => Ok(Packet::Close),
            // Probe payloads ("2probe") are irrelevant on a pure websocket transport
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => Ok(Packet::Message(SocketPacket::decode(rest)?)),
            '6' => Ok(Packet::Noop),
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

impl SocketPacket {
    fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(v)) => format!("0{}", v),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { ack, name, data } => {
                let mut items = Vec::with_capacity(data.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(data.iter().cloned());
                let id = ack.map(|a| a.to_string()).unwrap_or_default();
                format!("2{}{}", id, Value::Array(items))
            }
            SocketPacket::Ack { id, data } => format!("3{}{}", id, Value::Array(data.clone())),
            SocketPacket::ConnectError(v) => format!("4{}", v),
        }
    }

    fn decode(body: &str) -> Result<Self, CodecError> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let mut rest = chars.as_str();

        if let Some(stripped) = rest.strip_prefix('/') {
            let (nsp, after) = match stripped.split_once(',') {
                Some((nsp, after)) => (nsp, after),
                None => (stripped, ""),
            };
            if !nsp.is_empty() {
                return Err(CodecError::UnsupportedNamespace(format!("/{}", nsp)));
            }
            rest = after;
        }

        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let id = if digits > 0 {
            Some(rest[..digits].parse::<u64>().map_err(|_| CodecError::Malformed("ack id overflow"))?)
        } else {
            None
        };
        let payload = &rest[digits..];

        match kind {
            '0' => {
                if payload.is_empty() {
                    Ok(SocketPacket::Connect(None))
                } else {
                    Ok(SocketPacket::Connect(Some(parse_json(payload)?)))
                }
            }
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let mut items = parse_array(payload)?;
                if items.is_empty() {
                    return Err(CodecError::Malformed("event without a name"));
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    _ => return Err(CodecError::Malformed("event name must be a string")),
                };
                Ok(SocketPacket::Event { ack: id, name, data: items })
            }
            '3' => {
                let id = id.ok_or(CodecError::Malformed("ack without id"))?;
                Ok(SocketPacket::Ack { id, data: parse_array(payload)? })
            }
            '4' => Ok(SocketPacket::ConnectError(if payload.is_empty() { Value::Null } else { parse_json(payload)? })),
            '5' | '6' => Err(CodecError::Binary),
            other => Err(CodecError::UnknownType(other)),
        }
    }
}

fn parse_json(text: &str) -> Result<Value, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Json(e.to_string()))
}

fn parse_array(text: &str) -> Result<Vec<Value>, CodecError> {
    match parse_json(text)? {
        Value::Array(items) => Ok(items),
        _ => Err(CodecError::Malformed("expected a JSON array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_engine_open() {
        let p = Packet::decode(r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#).unwrap();
        match p {
            Packet::Open(v) => assert_eq!(v["sid"], "abc"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decodes_connect_ack_with_sid() {
        let p = Packet::decode(r#"40{"sid":"s1"}"#).unwrap();
        assert_eq!(p, Packet::Message(SocketPacket::Connect(Some(json!({"sid": "s1"})))));
    }

    #[test]
    fn encodes_event_with_ack_id() {
        let p = Packet::event("plan:message:send", json!({"plan_id": "1", "message": "hi"}), Some(12));
        let frame = p.encode();
        assert!(frame.starts_with(r#"4212["plan:message:send",{"#));
        assert_eq!(Packet::decode(&frame).unwrap(), p);
    }

    #[test]
    fn decodes_ack() {
        let p = Packet::decode(r#"4312[{"text":"hi"}]"#).unwrap();
        assert_eq!(p, Packet::Message(SocketPacket::Ack { id: 12, data: vec![json!({"text": "hi"})] }));
    }

    #[test]
    fn decodes_event_without_ack() {
        let p = Packet::decode(r#"42["plan:users",{"count":2}]"#).unwrap();
        assert_eq!(
            p,
            Packet::Message(SocketPacket::Event { ack: None, name: "plan:users".into(), data: vec![json!({"count": 2})] })
        );
    }

    #[test]
    fn accepts_explicit_root_namespace() {
        let p = Packet::decode(r#"42/,["plan:announcement",{"msg":"x"}]"#).unwrap();
        assert!(matches!(p, Packet::Message(SocketPacket::Event { .. })));
    }

    #[test]
    fn rejects_other_namespaces_and_binary() {
        assert_eq!(
            Packet::decode(r#"42/admin,["x"]"#),
            Err(CodecError::UnsupportedNamespace("/admin".into()))
        );
        assert_eq!(Packet::decode(r#"451-["x",{"_placeholder":true,"num":0}]"#), Err(CodecError::Binary));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Packet::decode(""), Err(CodecError::Empty));
        assert_eq!(Packet::decode("9"), Err(CodecError::UnknownType('9')));
        assert!(matches!(Packet::decode("42{}"), Err(CodecError::Malformed(_))));
        assert!(matches!(Packet::decode("43[]"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn control_packets() {
        assert_eq!(Packet::decode("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::Pong.encode(), "3");
        assert_eq!(Packet::Message(SocketPacket::Connect(None)).encode(), "40");
        assert_eq!(Packet::decode("41").unwrap(), Packet::Message(SocketPacket::Disconnect));
    }
}
