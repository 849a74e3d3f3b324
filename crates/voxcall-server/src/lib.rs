//! VoxCall server library logic.

pub mod api;
pub mod api_media;
pub mod background;
pub mod config;
pub mod media;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use config::Config;
use media::MediaHub;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use voxcall_calls::{
    CallError, CallLifecycleController, Collaborators, FoundryAssistant, GraphCallingClient,
};
use voxcall_speech::{AzureRecognizer, AzureSynthesizer, SpeechError, SynthesisService};

/// Maximum request body size (2 MiB). Bounds JSON audio chunks and
/// notification batches.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: CallLifecycleController,
    /// Used directly by the synthesis endpoint; the controller holds its own
    /// handle to the same service.
    pub synthesis: Arc<SynthesisService>,
    /// Bridges replies to connected media websockets.
    pub media: Arc<MediaHub>,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("speech setup failed: {0}")]
    Speech(#[from] SpeechError),
    #[error("client setup failed: {0}")]
    Calls(#[from] CallError),
}

/// Wires the Azure speech backends, the Graph calling client and the Foundry
/// assistant into a controller.
///
/// # Errors
///
/// Returns `StartupError` if an HTTP client cannot be constructed.
pub fn build_state(config: &Config) -> Result<AppState, StartupError> {
    let speech = Arc::new(config.speech.clone());
    let synthesis = Arc::new(SynthesisService::new(
        Some(Arc::clone(&speech)),
        Arc::new(AzureSynthesizer::new()?),
    ));
    let media = Arc::new(MediaHub::new());

    let controller = CallLifecycleController::new(
        Collaborators {
            calling: Arc::new(GraphCallingClient::new(config.calling.graph_settings())?),
            replies: Arc::new(FoundryAssistant::new(config.assistant.foundry_settings())?),
            synthesis: Arc::clone(&synthesis),
            recognizer: Arc::new(AzureRecognizer::new(Arc::clone(&speech))),
            media: media.clone(),
            speech,
        },
        config.controller_settings(),
    );

    Ok(AppState {
        controller,
        synthesis,
        media,
    })
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/calling/callback", post(api::callback_handler))
        .route("/api/calls", get(api::list_calls_handler))
        .route("/api/calls/{callId}", delete(api::end_call_handler))
        .route("/api/calls/{callId}/audio", post(api::feed_audio_handler))
        .route("/api/calls/{callId}/media", get(api_media::media_ws_handler))
        .route("/api/speech/synthesize", post(api::synthesize_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
