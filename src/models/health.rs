use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API response for health check
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    /// Backend base URL the proxy forwards to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}
