use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Body the backend returns from the authentication callback.
///
/// Only `token` and `redirect` are interpreted; anything else is ignored
/// by the proxy and forwarded untouched when no token is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CallbackPayload {
    #[serde(default, deserialize_with = "string_or_none")]
    pub token: Option<String>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub redirect: Option<String>,
}

// A non-string token (number, object, null) counts as "no token".
fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    })
}

impl CallbackPayload {
    /// Parse a callback body; non-JSON or non-object bodies yield an empty payload.
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}
