use axum::{extract::State, Json};
use crate::{models::HealthResponse, AppState};
use tracing::debug;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Server is running".to_string(),
        backend: None,
    })
}

/// Readiness check endpoint
pub async fn ready_check(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!("Readiness check requested");
    // The gateway holds no state of its own; readiness only reports where it forwards to.
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Service is ready".to_string(),
        backend: Some(state.backend.base_url().to_string()),
    })
}
