mod config;
mod routes;
mod speech;

use crate::config::Config;
use crate::routes::AppState;
use crate::speech::TtsClient;
use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use interview_core::DetectorKind;
use interview_core::coverage::{CascadeDetector, CoverageDetector, LlmArbiterDetector};
use interview_core::embedding::{Embedder, OpenAiEmbedder};
use interview_core::llm::{LlmGateway, OpenAiGateway};
use interview_core::registry::SessionRegistry;
use interview_core::store::QuestionStore;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared State ---
    let engine = &config.engine;
    let store = Arc::new(QuestionStore::new());
    let gateway: Arc<dyn LlmGateway> = Arc::new(OpenAiGateway::new(
        engine.openai_api_key.clone(),
        engine.openai_model.clone(),
    ));
    let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(
        engine.openai_api_key.clone(),
        engine.embedding_model.clone(),
        engine.embedding_dim,
    ));
    let detector: Arc<dyn CoverageDetector> = match engine.detector {
        DetectorKind::Cascade => Arc::new(CascadeDetector::new(
            embedder.clone(),
            engine.thresholds,
            engine.adaptive_thresholds,
        )),
        DetectorKind::LlmArbiter => Arc::new(LlmArbiterDetector::new(gateway.clone())),
    };

    let app_state = Arc::new(AppState {
        registry: SessionRegistry::new(store.clone()),
        store,
        gateway,
        embedder,
        detector,
        llm_settings: engine.llm_settings(),
        coverage_threshold_percent: engine.coverage_threshold_percent,
        tts: TtsClient::new(engine.openai_api_key.clone()),
        tts_voice: config.tts_voice.clone(),
    });

    // --- 4. Configure Server ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/questions/load", post(routes::load_questions))
        .route("/questions/status", get(routes::questions_status))
        .route("/interview/start", post(routes::start_interview))
        .route("/interview/next", get(routes::next_question))
        .route("/interview/answer", post(routes::submit_answer))
        .route("/interview/end", post(routes::end_interview))
        .route("/sessions/info", get(routes::sessions_info))
        .route("/tts/speak", get(routes::tts_speak))
        .layer(cors)
        .with_state(app_state);

    // --- 5. Start Server with Graceful Shutdown ---
    info!("Starting interview server, listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server has shut down.");
    Ok(())
}
