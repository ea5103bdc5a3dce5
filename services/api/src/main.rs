mod config;
mod messages;
mod routes;
mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use canvas_core::orchestrator::Orchestrator;
use canvas_core::provider::OpenAiProvider;
use canvas_core::registry::ConnectionRegistry;
use canvas_core::session::SessionStore;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Shared application state handed to every handler.
pub struct AppState {
    pub orchestrator: Orchestrator<OpenAiProvider>,
    pub registry: Arc<ConnectionRegistry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string())),
        )
        .init();

    let store = Arc::new(SessionStore::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let provider = OpenAiProvider::new(
        config.openai_api_key.clone(),
        config.chat_model.clone(),
        config.vision_model.clone(),
        config.generation.clone(),
    );
    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(store, provider),
        registry,
    });

    // Permissive CORS so the drawing frontend can connect from any origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/drawing/new", post(routes::create_drawing))
        .route("/drawing/done", post(routes::complete_drawing))
        .route("/drawing/history/{canvas_id}", get(routes::drawing_history))
        .route("/chat", get(routes::chat_get).post(routes::chat_post))
        .route("/ws/drawing/{robot_id}/{canvas_id}", get(ws::voice_ws))
        .route("/drawing/send", get(ws::analysis_ws))
        .layer(cors)
        .with_state(state);

    info!("Starting drawing companion server, listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
