//! Plan-room gateway: a session-bridging reverse proxy for the plan backend
//! and the realtime client that multiplexes plan rooms over one connection.

pub mod clients;
pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod ws;

use std::sync::Arc;

use clients::BackendClient;
use config::Config;

/// Shared, read-only state for proxy handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: Arc<BackendClient>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let backend = BackendClient::new(config.backend_base_url(), config.backend_timeout())?;
        Ok(Self {
            config: Arc::new(config),
            backend: Arc::new(backend),
        })
    }
}
