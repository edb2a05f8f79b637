//! Proxy behaviour against a mocked backend.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use plannit_gateway::{config::Config, routes::create_api_routes, AppState};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;
use wiremock::matchers::{body_json, header as has_header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(base_url: String) -> Router {
    let mut config = Config::default();
    config.private_api_base_url = Some(base_url);
    create_api_routes(AppState::new(config).unwrap())
}

async fn gateway(backend: &MockServer) -> Router {
    gateway_for(backend.uri())
}

fn set_cookies(response: &axum::response::Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn gateway_with_limit(base_url: String, limit: usize) -> Router {
    let mut config = Config::default();
    config.private_api_base_url = Some(base_url);
    config.max_buffered_body_bytes = limit;
    create_api_routes(AppState::new(config).unwrap())
}

/// One-shot backend answering with a chunked body, so no Content-Length is known.
async fn chunked_backend(chunks: &'static [&'static str]) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let mut response = String::from(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n",
        );
        for chunk in chunks {
            response.push_str(&format!("{:x}\r\n{}\r\n", chunk.len(), chunk));
        }
        response.push_str("0\r\n\r\n");
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });
    format!("http://{}", addr)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_get_with_session_sends_bearer_and_drops_browser_headers() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plan/42"))
        .and(has_header("authorization", "Bearer abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(
            Request::builder()
                .uri("/api/plan/42")
                .header(header::HOST, "app.test")
                .header(header::COOKIE, "theme=dark; plannit-token=abc123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"id":42}"#);

    let received = backend.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let forwarded = &received[0];
    assert!(forwarded.headers.get(header::COOKIE).is_none());
    assert_ne!(forwarded.headers.get(header::HOST).unwrap(), "app.test");
}

#[tokio::test]
async fn test_query_string_is_preserved() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/explore"))
        .and(query_param("page", "2"))
        .and(query_param("q", "hike"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(Request::builder().uri("/api/explore?page=2&q=hike").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_caller_authorization_is_not_replaced() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .and(has_header("authorization", "Bearer from-caller"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(
            Request::builder()
                .uri("/api/user")
                .header(header::AUTHORIZATION, "Bearer from-caller")
                .header(header::COOKIE, "plannit-token=from-cookie")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_json_body_is_forwarded_verbatim() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/plans"))
        .and(body_json(json!({"title": "Lake weekend", "votes": [1, 2]})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "p1"})))
        .expect(1)
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/plans")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"title":"Lake weekend","votes":[1,2]}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_text(response).await, r#"{"id":"p1"}"#);
}

#[tokio::test]
async fn test_streamed_body_reaches_backend() {
    let backend = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/plans/p1/cover"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/plans/p1/cover")
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(Body::from(vec![7u8; 4096]))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let received = backend.received_requests().await.unwrap();
    assert_eq!(received[0].body.len(), 4096);
}

#[tokio::test]
async fn test_backend_rejection_keeps_status_and_body() {
    let backend = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/plans/p1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "expired"})))
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(Request::builder().method("DELETE").uri("/api/plans/p1").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(response).await, r#"{"message":"expired"}"#);
}

#[tokio::test]
async fn test_backend_redirects_are_not_followed() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "https://accounts.example.com/o/auth"))
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(Request::builder().uri("/api/auth/login").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), "https://accounts.example.com/o/auth");
}

#[tokio::test]
async fn test_callback_with_token_sets_cookie_and_redirects() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/callback"))
        .and(query_param("code", "xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "abc123", "redirect": "/dashboard"})))
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(Request::builder().uri("/api/auth/callback?code=xyz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/dashboard");
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("plannit-token=abc123"));
    assert!(cookies[0].contains("HttpOnly"));
    assert!(cookies[0].contains("SameSite=Lax"));
    assert!(cookies[0].contains("Max-Age=3600"));
    assert!(body_text(response).await.is_empty());
}

#[tokio::test]
async fn test_callback_redirect_defaults_and_stays_on_origin() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/callback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t", "redirect": "//evil.test"})))
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(
            Request::builder()
                .uri("/api/auth/callback")
                .header("x-forwarded-proto", "https")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/dashboard");
    assert!(set_cookies(&response)[0].contains("Secure"));
}

#[tokio::test]
async fn test_callback_without_token_is_forwarded_unchanged() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/callback"))
        .respond_with(ResponseTemplate::new(403).set_body_raw(r#"{"error":"denied"}"#, "application/json"))
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(Request::builder().uri("/api/auth/callback").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "application/json");
    assert_eq!(body_text(response).await, r#"{"error":"denied"}"#);
}

#[tokio::test]
async fn test_callback_with_non_json_body_is_forwarded_unchanged() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/callback"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(Request::builder().uri("/api/auth/callback").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "upstream exploded");
}

#[tokio::test]
async fn test_chunked_callback_response_is_read() {
    let base_url = chunked_backend(&[r#"{"token":"#, r#""abc123"}"#]).await;
    let response = gateway_with_limit(base_url, 64)
        .oneshot(Request::builder().uri("/api/auth/callback").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(set_cookies(&response)[0].starts_with("plannit-token=abc123"));
}

#[tokio::test]
async fn test_chunked_callback_response_over_limit_is_bad_gateway() {
    let base_url = chunked_backend(&[r#"{"token":""#, "0123456789abcdef0123", r#""}"#]).await;
    let response = gateway_with_limit(base_url, 16)
        .oneshot(Request::builder().uri("/api/auth/callback").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(set_cookies(&response).is_empty());
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["code"], 502);
}

#[tokio::test]
async fn test_logout_clears_cookie_whatever_the_backend_says() {
    for status in [200u16, 401, 500] {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&backend)
            .await;

        let response = gateway(&backend)
            .await
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/logout")
                    .header(header::COOKIE, "plannit-token=abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), status);
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 1, "status {}", status);
        assert!(cookies[0].starts_with("plannit-token=;"));
        assert!(cookies[0].contains("Max-Age=0"));
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway_and_logout_still_clears() {
    // Nothing listens on port 9 of the loopback interface
    let app = gateway_for("http://127.0.0.1:9".to_string());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/plan/1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["code"], 502);

    let response = app
        .oneshot(Request::builder().method("POST").uri("/api/auth/logout").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(set_cookies(&response)[0].contains("Max-Age=0"));
}

#[tokio::test]
async fn test_oversized_json_body_is_rejected() {
    let backend = MockServer::start().await;
    let app = gateway_with_limit(backend.uri(), 16);

    let body = r#"{"text":"this is far more than sixteen bytes"}"#;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/plans")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONTENT_LENGTH, body.len())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_prefix_with_trailing_slash_reaches_backend_root() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"service": "plannit"})))
        .expect(1)
        .mount(&backend)
        .await;

    let response = gateway(&backend)
        .await
        .oneshot(Request::builder().uri("/api/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"service":"plannit"}"#);
}

#[tokio::test]
async fn test_unsupported_method_is_rejected() {
    let backend = MockServer::start().await;
    let response = gateway(&backend)
        .await
        .oneshot(Request::builder().method("OPTIONS").uri("/api/plan/1").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_health_and_openapi() {
    let backend = MockServer::start().await;
    let app = gateway(&backend).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/api-docs/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(doc["paths"].get("/api/auth/callback").is_some());
}
