use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use tracing::warn;

pub const CALLBACK_PREFIX: &str = "/auth/callback";
pub const LOGOUT_PREFIX: &str = "/auth/logout";

// Never forwarded in either direction
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// How the proxy treats a backend path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRoute {
    /// Token exchange: the JSON response is turned into a session cookie
    AuthCallback,
    /// Session teardown: the cookie is deleted, the request still forwarded
    Logout,
    Forward,
}

impl ProxyRoute {
    pub fn classify(target_path: &str) -> Self {
        if target_path.starts_with(CALLBACK_PREFIX) {
            ProxyRoute::AuthCallback
        } else if target_path.starts_with(LOGOUT_PREFIX) {
            ProxyRoute::Logout
        } else {
            ProxyRoute::Forward
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPolicy {
    /// Nothing to send or read
    Empty,
    /// Pass chunks through as they arrive
    Stream,
    /// Read fully into memory first
    Buffer,
}

/// Request bodies: none for GET/HEAD, buffered when the body is JSON or the
/// exchange must be re-read, streamed otherwise.
pub fn request_body_policy(method: &Method, headers: &HeaderMap, route: ProxyRoute) -> BodyPolicy {
    if method == Method::GET || method == Method::HEAD {
        return BodyPolicy::Empty;
    }
    if route == ProxyRoute::AuthCallback || is_json(headers) {
        return BodyPolicy::Buffer;
    }
    BodyPolicy::Stream
}

/// Response bodies: only the callback response is inspected.
pub fn response_body_policy(method: &Method, route: ProxyRoute) -> BodyPolicy {
    match route {
        _ if method == Method::HEAD => BodyPolicy::Empty,
        ProxyRoute::AuthCallback => BodyPolicy::Buffer,
        ProxyRoute::Logout | ProxyRoute::Forward => BodyPolicy::Stream,
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

/// `<base><path><?query>`; `base` carries no trailing slash.
pub fn target_url(base_url: &str, target_path: &str, query: Option<&str>) -> String {
    match query.filter(|q| !q.is_empty()) {
        Some(q) => format!("{}{}?{}", base_url, target_path, q),
        None => format!("{}{}", base_url, target_path),
    }
}

/// Headers for the backend request: browser-only and hop-by-hop headers
/// removed, bearer credentials added from the session when the caller sent none.
pub fn outbound_headers(inbound: &HeaderMap, session_token: Option<&str>) -> HeaderMap {
    let mut headers = inbound.clone();
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::COOKIE);
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }

    if !headers.contains_key(header::AUTHORIZATION) {
        if let Some(token) = session_token {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => warn!("Session token is not a valid header value, forwarding unauthenticated"),
            }
        }
    }
    headers
}

/// Headers for the browser response: everything the backend sent except hop-by-hop.
pub fn response_headers(backend: &HeaderMap) -> HeaderMap {
    let mut headers = backend.clone();
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_special_paths() {
        assert_eq!(ProxyRoute::classify("/auth/callback"), ProxyRoute::AuthCallback);
        assert_eq!(ProxyRoute::classify("/auth/callback/google"), ProxyRoute::AuthCallback);
        assert_eq!(ProxyRoute::classify("/auth/logout"), ProxyRoute::Logout);
        assert_eq!(ProxyRoute::classify("/auth/login"), ProxyRoute::Forward);
        assert_eq!(ProxyRoute::classify("/plan/42"), ProxyRoute::Forward);
        assert_eq!(ProxyRoute::classify(""), ProxyRoute::Forward);
    }

    #[test]
    fn body_policy_table() {
        let mut json = HeaderMap::new();
        json.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        let mut upload = HeaderMap::new();
        upload.insert(header::CONTENT_TYPE, HeaderValue::from_static("multipart/form-data; boundary=x"));
        let none = HeaderMap::new();

        assert_eq!(request_body_policy(&Method::GET, &json, ProxyRoute::Forward), BodyPolicy::Empty);
        assert_eq!(request_body_policy(&Method::HEAD, &none, ProxyRoute::AuthCallback), BodyPolicy::Empty);
        assert_eq!(request_body_policy(&Method::POST, &json, ProxyRoute::Forward), BodyPolicy::Buffer);
        assert_eq!(request_body_policy(&Method::PUT, &upload, ProxyRoute::Forward), BodyPolicy::Stream);
        assert_eq!(request_body_policy(&Method::POST, &none, ProxyRoute::AuthCallback), BodyPolicy::Buffer);
        assert_eq!(request_body_policy(&Method::DELETE, &none, ProxyRoute::Logout), BodyPolicy::Stream);

        assert_eq!(response_body_policy(&Method::GET, ProxyRoute::AuthCallback), BodyPolicy::Buffer);
        assert_eq!(response_body_policy(&Method::POST, ProxyRoute::Forward), BodyPolicy::Stream);
        assert_eq!(response_body_policy(&Method::HEAD, ProxyRoute::Forward), BodyPolicy::Empty);
    }

    #[test]
    fn problem_json_counts_as_json() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/merge-patch+json"));
        assert_eq!(request_body_policy(&Method::PATCH, &headers, ProxyRoute::Forward), BodyPolicy::Buffer);
    }

    #[test]
    fn target_url_keeps_path_and_query() {
        assert_eq!(target_url("http://b:5000", "/plan/42", Some("a=1&b=2")), "http://b:5000/plan/42?a=1&b=2");
        assert_eq!(target_url("http://b:5000", "/plan/42", Some("")), "http://b:5000/plan/42");
        assert_eq!(target_url("http://b:5000", "", None), "http://b:5000");
    }

    #[test]
    fn outbound_headers_inject_bearer_and_strip_browser_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("app.test"));
        inbound.insert(header::COOKIE, HeaderValue::from_static("plannit-token=abc"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let out = outbound_headers(&inbound, Some("abc"));
        assert_eq!(out.get(header::AUTHORIZATION).unwrap(), "Bearer abc");
        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::COOKIE).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert_eq!(out.get(header::ACCEPT).unwrap(), "application/json");
    }

    #[test]
    fn explicit_authorization_wins() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer caller"));
        let out = outbound_headers(&inbound, Some("session"));
        assert_eq!(out.get(header::AUTHORIZATION).unwrap(), "Bearer caller");
    }

    #[test]
    fn no_session_no_authorization() {
        let out = outbound_headers(&HeaderMap::new(), None);
        assert!(out.get(header::AUTHORIZATION).is_none());
    }
}
