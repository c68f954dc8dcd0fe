mod api;
mod config;
mod error;
mod models;
mod services;

use crate::api::AppState;
use crate::config::Config;
use crate::services::{spotify, CatalogConnection, CatalogFactory, SessionManager, SpotifyClient};
use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,trackguess=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // One HTTP client and one rate limiter shared by every session
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.catalog_timeout_seconds))
        .build()?;
    let limiter = spotify::rate_limiter(config.catalog_requests_per_second);

    let connect: CatalogFactory = {
        let base_url = config.spotify_api_url.clone();
        let max_tracks = config.max_playlist_tracks;
        Arc::new(move || {
            let client = Arc::new(SpotifyClient::new(
                base_url.clone(),
                http_client.clone(),
                limiter.clone(),
                max_tracks,
            ));
            CatalogConnection {
                catalog: client.clone(),
                auth: client,
            }
        })
    };

    let sessions = SessionManager::new(connect, &config);
    sessions.spawn_reaper();
    tracing::info!(
        "Sessions expire after {}s idle",
        config.session_idle_timeout_seconds
    );

    let app_state = Arc::new(AppState { sessions });

    // Build router
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .nest(
            "/api/v1",
            api::session_routes().with_state(app_state.clone()),
        )
        // Middleware
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origins));

    // Start server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS allows any origin");
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}
