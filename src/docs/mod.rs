use axum::Json;
use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Token exchange with the backend. On success the browser receives the
/// session cookie and a redirect instead of the JSON body.
#[utoipa::path(
    get,
    path = "/api/auth/callback",
    responses(
        (status = 303, description = "Session cookie set, redirect to the post-login page"),
        (status = 502, description = "Backend unreachable", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn auth_callback_doc() {}

/// Clears the session cookie and forwards the logout to the backend.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Backend response, session cookie removed")
    )
)]
#[allow(dead_code)]
pub async fn logout_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        auth_callback_doc,
        logout_doc,
    ),
    components(
        schemas(HealthResponse, ErrorResponse, CallbackPayload)
    ),
    tags(
        (name = "gateway", description = "Session-bridging proxy to the plan backend")
    )
)]
pub struct ApiDoc;

/// Serve the OpenAPI document
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
