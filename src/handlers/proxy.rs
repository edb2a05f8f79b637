use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::{CallbackPayload, ErrorResponse};
use crate::routes::PROXY_PREFIX;
use crate::services::auth_service::{
    is_secure_request, removal_cookie, safe_redirect, session_cookie, token_lifetime, SessionToken,
};
use crate::services::proxy_service::{
    outbound_headers, request_body_policy, response_body_policy, response_headers, BodyPolicy, ProxyRoute,
};
use crate::AppState;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("backend unreachable: {0}")]
    BackendUnavailable(#[from] reqwest::Error),
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("request body could not be read: {0}")]
    BodyRead(String),
    #[error("backend response exceeds {0} bytes")]
    ResponseTooLarge(usize),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::ResponseTooLarge(_) => StatusCode::BAD_GATEWAY,
        };
        ErrorResponse::with_status(status, self.to_string()).into_response()
    }
}

/// Forward a browser request to the backend, bridging the session cookie to
/// bearer authentication.
pub async fn proxy_request(
    State(state): State<AppState>,
    Extension(session): Extension<SessionToken>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let target_path = parts.uri.path().strip_prefix(PROXY_PREFIX).unwrap_or_default();
    let route = ProxyRoute::classify(target_path);
    let url = state.backend.url_for(target_path, parts.uri.query());
    let secure = is_secure_request(
        &parts.headers,
        &parts.uri,
        state.config.force_secure_cookies || state.config.is_production(),
    );

    let headers = outbound_headers(&parts.headers, session.0.as_deref());
    let limit = state.config.max_buffered_body_bytes;

    let outbound_body = match request_body_policy(&parts.method, &parts.headers, route) {
        BodyPolicy::Empty => None,
        BodyPolicy::Stream => Some(reqwest::Body::wrap_stream(body.into_data_stream())),
        BodyPolicy::Buffer => match buffer_request_body(&parts.headers, body, limit).await {
            Ok(bytes) => Some(reqwest::Body::from(bytes)),
            Err(e) => {
                warn!("{} {}: {}", parts.method, target_path, e);
                return e.into_response();
            }
        },
    };

    let response = match state.backend.forward(parts.method.clone(), &url, headers, outbound_body).await {
        Ok(response) => response,
        Err(e) => {
            error!("Proxy {} {} failed: {}", parts.method, url, e);
            let mut response = ProxyError::from(e).into_response();
            if route == ProxyRoute::Logout {
                clear_session(&mut response, &state.config.session_cookie_name, secure);
            }
            return response;
        }
    };

    match (route, response_body_policy(&parts.method, route)) {
        (ProxyRoute::AuthCallback, BodyPolicy::Buffer) => finish_callback(&state, response, secure).await,
        (ProxyRoute::Logout, policy) => {
            info!("Logout, clearing session cookie");
            let mut out = relay(response, policy);
            clear_session(&mut out, &state.config.session_cookie_name, secure);
            out
        }
        (_, policy) => relay(response, policy),
    }
}

async fn buffer_request_body(headers: &axum::http::HeaderMap, body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ProxyError::BodyTooLarge(limit));
    }
    to_bytes(body, limit).await.map_err(|e| ProxyError::BodyRead(e.to_string()))
}

/// Backend status, headers and body, unchanged
fn relay(response: reqwest::Response, policy: BodyPolicy) -> Response {
    let status = response.status();
    let headers = response_headers(response.headers());
    let body = match policy {
        BodyPolicy::Empty => Body::empty(),
        BodyPolicy::Stream | BodyPolicy::Buffer => Body::from_stream(response.bytes_stream()),
    };
    let mut out = Response::new(body);
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// Trade a backend token for a session cookie, or pass the failure through.
async fn finish_callback(state: &AppState, response: reqwest::Response, secure: bool) -> Response {
    let limit = state.config.max_buffered_body_bytes;
    if response.content_length().is_some_and(|len| len as usize > limit) {
        warn!("Auth callback response too large to inspect, forwarding as-is");
        return relay(response, BodyPolicy::Stream);
    }

    let status = response.status();
    let mut headers = response_headers(response.headers());
    let bytes = match read_limited(response, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read auth callback response: {}", e);
            return e.into_response();
        }
    };

    let payload = CallbackPayload::from_body(&bytes);
    let Some(token) = payload.token else {
        warn!("Auth callback returned no token (status {})", status);
        headers.remove(header::CONTENT_LENGTH);
        let mut out = Response::new(Body::from(bytes));
        *out.status_mut() = status;
        *out.headers_mut() = headers;
        return out;
    };

    let config = &state.config;
    let max_age = token_lifetime(&token, config.session_max_age_secs);
    let cookie = session_cookie(&config.session_cookie_name, &token, max_age, secure);
    let location = safe_redirect(payload.redirect.as_deref(), &config.post_login_redirect);
    info!("Session established, redirecting to {}", location);

    let mut out = Response::new(Body::empty());
    *out.status_mut() = StatusCode::SEE_OTHER;
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            out.headers_mut().insert(header::LOCATION, value);
        }
        Err(_) => {
            warn!("Redirect target is not a valid header value, using default");
            if let Ok(value) = HeaderValue::from_str(&config.post_login_redirect) {
                out.headers_mut().insert(header::LOCATION, value);
            }
        }
    }
    append_cookie(&mut out, &cookie.to_string());
    out
}

// Chunked responses carry no length up front, so the limit is enforced while reading.
async fn read_limited(mut response: reqwest::Response, limit: usize) -> Result<Bytes, ProxyError> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(ProxyError::ResponseTooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(body))
}

fn clear_session(response: &mut Response, cookie_name: &str, secure: bool) {
    append_cookie(response, &removal_cookie(cookie_name, secure).to_string());
}

fn append_cookie(response: &mut Response, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => error!("Cannot encode Set-Cookie header: {}", e),
    }
}
