//! HTTP handlers for the VoxCall server.

use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use voxcall_calls::{CallError, CallSummary, NotificationOutcome};
use voxcall_speech::{AudioChunk, SpeechError};
use voxcall_types::CallNotificationBatch;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream service failed: {0}")]
    BadGateway(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<CallError> for ApiError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::UnknownCall(call_id) => ApiError::NotFound(format!("call {}", call_id)),
            CallError::Invalid(msg) => ApiError::BadRequest(msg),
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

impl From<SpeechError> for ApiError {
    fn from(e: SpeechError) -> Self {
        match e {
            SpeechError::EmptyText
            | SpeechError::UnsupportedChunkType(_)
            | SpeechError::InvalidAudio(_) => ApiError::BadRequest(e.to_string()),
            SpeechError::Synthesis(_) | SpeechError::Transport(_) | SpeechError::Timeout(_) => {
                ApiError::BadGateway(e.to_string())
            }
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub outcomes: Vec<NotificationOutcome>,
}

/// Request body for `POST /api/calls/{callId}/audio`.
#[derive(Debug, Deserialize)]
pub struct AudioRequest {
    /// Base64 string, byte array, or `{"type":"Buffer","data":[..]}` object.
    pub chunk: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AudioResponse {
    pub outcome: String,
}

/// Request body for `POST /api/speech/synthesize`.
#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(rename = "voiceName", default)]
    pub voice_name: Option<String>,
}

/// Handler for `POST /api/calling/callback`.
///
/// Always accepts a well-formed batch; per-notification failures are
/// reported in the outcomes.
pub async fn callback_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(batch): Json<CallNotificationBatch>,
) -> (StatusCode, Json<CallbackResponse>) {
    tracing::info!(notifications = batch.value.len(), "received call notifications");
    let outcomes = state.controller.on_notification(&batch).await;
    (StatusCode::ACCEPTED, Json(CallbackResponse { outcomes }))
}

/// Handler for `GET /api/calls`.
pub async fn list_calls_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<CallSummary>> {
    Json(state.controller.calls())
}

/// Handler for `POST /api/calls/{callId}/audio`.
pub async fn feed_audio_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
    Json(payload): Json<AudioRequest>,
) -> Result<Json<AudioResponse>, ApiError> {
    let chunk = AudioChunk::from_json(&payload.chunk);
    let outcome = state.controller.feed_audio(&call_id, chunk).await?;
    Ok(Json(AudioResponse {
        outcome: outcome.as_str().to_string(),
    }))
}

/// Handler for `DELETE /api/calls/{callId}`.
pub async fn end_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.end_call(&call_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `POST /api/speech/synthesize`.
///
/// Responds with the synthesized audio and the content type of the
/// configured output format.
pub async fn synthesize_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<SynthesizeRequest>,
) -> Result<Response, ApiError> {
    let audio = state
        .synthesis
        .synthesize(&payload.text, payload.voice_name.as_deref())
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "synthesis request failed"))?;

    Ok((
        [(header::CONTENT_TYPE, audio.content_type())],
        audio.bytes,
    )
        .into_response())
}
