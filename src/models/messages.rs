use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JOIN_EVENT: &str = "plan:join";
pub const LEAVE_EVENT: &str = "plan:leave";
pub const SEND_EVENT: &str = "plan:message:send";
pub const MESSAGE_EVENT: &str = "plan:message:new";
pub const PRESENCE_EVENT: &str = "plan:users";
pub const ANNOUNCEMENT_EVENT: &str = "plan:announcement";
pub const ERROR_EVENT: &str = "error";

/// Payload of `plan:join` and `plan:leave`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RoomPayload {
    pub plan_id: String,
}

/// Payload of `plan:message:send`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OutboundChatMessage {
    pub plan_id: String,
    #[serde(rename = "message")]
    pub text: String,
}

/// Backend confirmation of a chat send
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AckPayload {
    #[serde(deserialize_with = "string_or_number")]
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub text: String,
    #[serde(rename = "date")]
    pub sent_at: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    #[serde(deserialize_with = "string_or_number")]
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub text: String,
    #[serde(rename = "date")]
    pub sent_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "opt_string_or_number")]
    pub plan_id: Option<String>,
}

/// Number of participants currently connected to a room
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

impl PresenceUpdate {
    /// The backend sends `{"count": n}`, `{"msg": n}` or `{"msg": {"count": n}}`.
    pub fn from_value(value: &Value) -> Self {
        let count = value
            .get("count")
            .and_then(non_negative)
            .or_else(|| value.get("msg").and_then(non_negative))
            .or_else(|| value.get("msg").and_then(|m| m.get("count")).and_then(non_negative))
            .unwrap_or(0);
        PresenceUpdate { count, plan_id: plan_id_of(value) }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

impl Announcement {
    pub fn from_value(value: &Value) -> Self {
        let text = value
            .get("msg")
            .or_else(|| value.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Announcement { text, plan_id: plan_id_of(value) }
    }
}

/// Events the backend broadcasts into a room
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ChatMessage(ChatMessage),
    PresenceUpdate(PresenceUpdate),
    Announcement(Announcement),
}

impl InboundEvent {
    /// Decode a named wire event. `Ok(None)` for events this channel does not carry.
    pub fn from_wire(name: &str, data: &Value) -> Result<Option<Self>, serde_json::Error> {
        match name {
            MESSAGE_EVENT => Ok(Some(InboundEvent::ChatMessage(ChatMessage::deserialize(data)?))),
            PRESENCE_EVENT => Ok(Some(InboundEvent::PresenceUpdate(PresenceUpdate::from_value(data)))),
            ANNOUNCEMENT_EVENT => Ok(Some(InboundEvent::Announcement(Announcement::from_value(data)))),
            _ => Ok(None),
        }
    }

    pub fn plan_id(&self) -> Option<&str> {
        match self {
            InboundEvent::ChatMessage(m) => m.plan_id.as_deref(),
            InboundEvent::PresenceUpdate(p) => p.plan_id.as_deref(),
            InboundEvent::Announcement(a) => a.plan_id.as_deref(),
        }
    }
}

fn non_negative(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
        .or_else(|| value.as_i64().map(|_| 0))
}

fn plan_id_of(value: &Value) -> Option<String> {
    match value.get("plan_id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {}", other))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Ok(None),
    }
}
