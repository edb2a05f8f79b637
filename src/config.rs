use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, error, warn};

/// Upper bound for the session cookie lifetime, matching the backend token validity.
pub const MAX_SESSION_AGE_SECS: i64 = 60 * 60;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Backend REST base URL, only visible to the gateway
    pub private_api_base_url: Option<String>,

    /// Backend REST base URL as published to browsers
    pub public_api_base_url: Option<String>,

    /// Base URL of the backend realtime endpoint
    #[serde(default = "default_backend_url")]
    pub public_backend_url: String,

    /// Name of the httpOnly session cookie
    #[serde(default = "default_cookie_name")]
    pub session_cookie_name: String,

    /// Session cookie lifetime in seconds
    #[serde(default = "default_session_max_age")]
    pub session_max_age_secs: i64,

    /// Where the browser lands after a successful token exchange
    #[serde(default = "default_post_login_redirect")]
    pub post_login_redirect: String,

    /// Mark the session cookie Secure even when TLS is terminated elsewhere
    #[serde(default)]
    pub force_secure_cookies: bool,

    /// Largest request or callback body the proxy will hold in memory
    #[serde(default = "default_max_buffered_body")]
    pub max_buffered_body_bytes: usize,

    /// Outbound request timeout towards the backend
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_secs: u64,

    /// How long a chat send waits for the backend acknowledgment
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// How long the realtime client waits for the connect handshake
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// First delay before reconnecting after an unexpected drop
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Ceiling for the doubling reconnect delay
    #[serde(default = "default_reconnect_delay_max")]
    pub reconnect_delay_max_ms: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config.validated())
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    fn validated(mut self) -> Self {
        if self.session_max_age_secs > MAX_SESSION_AGE_SECS || self.session_max_age_secs <= 0 {
            warn!(
                "SESSION_MAX_AGE_SECS={} is outside (0, {}], clamping",
                self.session_max_age_secs, MAX_SESSION_AGE_SECS
            );
            self.session_max_age_secs = self.session_max_age_secs.clamp(1, MAX_SESSION_AGE_SECS);
        }
        self
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Backend REST base URL: private first, then public, then the local default.
    pub fn backend_base_url(&self) -> String {
        let raw = self
            .private_api_base_url
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .or(self.public_api_base_url.as_deref().filter(|v| !v.trim().is_empty()))
            .unwrap_or("http://127.0.0.1:5000");
        raw.trim().trim_end_matches('/').to_string()
    }

    /// Realtime endpoint base URL with `localhost` pinned to the IPv4 loopback.
    pub fn realtime_base_url(&self) -> String {
        normalize_backend_url(&self.public_backend_url)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_delay_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_max_ms.max(self.reconnect_delay_ms))
    }

    /// Parsed CORS origins, `None` when CORS is not configured
    pub fn cors_origin_list(&self) -> Option<Vec<String>> {
        let origins: Vec<String> = self
            .cors_origins
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if origins.is_empty() { None } else { Some(origins) }
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            private_api_base_url: None,
            public_api_base_url: None,
            public_backend_url: default_backend_url(),
            session_cookie_name: default_cookie_name(),
            session_max_age_secs: default_session_max_age(),
            post_login_redirect: default_post_login_redirect(),
            force_secure_cookies: false,
            max_buffered_body_bytes: default_max_buffered_body(),
            backend_timeout_secs: default_backend_timeout(),
            ack_timeout_ms: default_ack_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            reconnect_delay_max_ms: default_reconnect_delay_max(),
        }
    }
}

pub fn normalize_backend_url(value: &str) -> String {
    value.trim().replace("localhost", "127.0.0.1").trim_end_matches('/').to_string()
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_backend_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_cookie_name() -> String {
    "plannit-token".to_string()
}

fn default_session_max_age() -> i64 {
    MAX_SESSION_AGE_SECS
}

fn default_post_login_redirect() -> String {
    "/dashboard".to_string()
}

fn default_max_buffered_body() -> usize {
    10 * 1024 * 1024
}

fn default_backend_timeout() -> u64 {
    30
}

fn default_ack_timeout() -> u64 {
    10_000
}

fn default_connect_timeout() -> u64 {
    20_000
}

fn default_reconnect_delay() -> u64 {
    1_000
}

fn default_reconnect_delay_max() -> u64 {
    5_000
}
