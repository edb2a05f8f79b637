use crate::{
    AppState,
    docs::openapi_json,
    handlers::{health_check, proxy_request, ready_check},
    routes::auth_middleware::session_middleware,
};
use axum::{middleware, routing::get, Router};

/// Browser-facing prefix the proxy is mounted under
pub const PROXY_PREFIX: &str = "/api";

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router {
    let proxy = get(proxy_request)
        .post(proxy_request)
        .put(proxy_request)
        .patch(proxy_request)
        .delete(proxy_request);

    Router::<AppState>::new()
        .route(PROXY_PREFIX, proxy.clone())
        .route(&format!("{}/", PROXY_PREFIX), proxy.clone())
        .route(&format!("{}/*path", PROXY_PREFIX), proxy)
        .route_layer(middleware::from_fn_with_state(state.clone(), session_middleware)) // Applies to all routes added above
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .with_state(state)
}
