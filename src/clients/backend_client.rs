use axum::http::{HeaderMap, Method};
use reqwest::{redirect, Body, Client};
use std::time::Duration;

use crate::services::proxy_service::target_url;

/// HTTP client for the backend REST API
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    /// Redirects are never followed: the proxy decides what a backend redirect means.
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, target_path: &str, query: Option<&str>) -> String {
        target_url(&self.base_url, target_path, query)
    }

    /// Send one request to the backend. Errors are transport failures only;
    /// any HTTP status from the backend comes back as `Ok`.
    pub async fn forward(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        request.send().await
    }
}
