use axum::http::HeaderValue;
use plannit_gateway::{config::Config, routes::create_api_routes, AppState};
use std::panic;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration
    let config_result = Config::load();
    let log_level = config_result
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to the configured level, but allow debug for our app
            format!("plannit_gateway=debug,tower_http=debug,{}", log_level).into()
        }))
        .init();

    info!("Starting gateway...");

    let config = config_result.unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    if config.is_development() {
        warn!("Running in development mode, session cookies are only Secure behind https");
    }

    let server_address = config.server_address();
    let cors = config.cors_origin_list();

    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to build backend client: {}", e);
            std::process::exit(1);
        }
    };
    info!("Forwarding /api to {}", state.backend.base_url());

    // Create routes
    let mut app_routes = create_api_routes(state)
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    if let Some(origins) = cors {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        info!("CORS enabled for {} origin(s)", origins.len());
        app_routes = app_routes.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_credentials(true),
        );
    }

    // Start the HTTP server
    let listener = tokio::net::TcpListener::bind(&server_address)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", server_address));

    info!("🚀 Gateway running on http://{}", server_address);
    info!("📚 OpenAPI available at http://{}/api-docs/openapi.json", server_address);

    axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed to start");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
