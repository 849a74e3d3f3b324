//! WebSocket media bridge: caller audio in, replies out.
//!
//! Inbound binary frames are raw audio. Inbound text frames are JSON chunks
//! (see [`AudioChunk::from_json`]) or bare base64. Replies leave as binary
//! frames for audio and `{"type":"text","text":..}` frames for text.

use crate::api::ApiError;
use crate::media::MediaFrame;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, Path, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use voxcall_calls::CallError;
use voxcall_speech::{AudioChunk, FeedOutcome};

/// Handler for `GET /api/calls/{callId}/media`.
pub async fn media_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if !state.controller.contains(&call_id) {
        return Err(ApiError::NotFound(format!("call {}", call_id)));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, call_id)))
}

/// Bare base64 may itself parse as JSON (`"1234"`), so only quoted strings,
/// arrays and objects are read as JSON.
fn text_chunk(text: &str) -> AudioChunk {
    let json_like = matches!(text.trim_start().chars().next(), Some('"' | '[' | '{'));
    match serde_json::from_str::<Value>(text) {
        Ok(value) if json_like => AudioChunk::from_json(&value),
        _ => AudioChunk::Base64(text.to_string()),
    }
}

fn outbound(frame: MediaFrame) -> AxumMessage {
    match frame {
        MediaFrame::Audio(bytes) => AxumMessage::Binary(bytes),
        MediaFrame::Text(text) => {
            AxumMessage::Text(json!({"type": "text", "text": text}).to_string().into())
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, call_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let mut replies = state.media.subscribe(&call_id);
    tracing::info!(call_id = %call_id, "media bridge connected");

    let send_call_id = call_id.clone();
    let send_task = tokio::spawn(async move {
        loop {
            match replies.recv().await {
                Ok(frame) => {
                    if sender.send(outbound(frame)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(call_id = %send_call_id, skipped, "media bridge too slow, replies dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut dropped = 0usize;
    while let Some(Ok(msg)) = receiver.next().await {
        let chunk = match msg {
            AxumMessage::Binary(bytes) => AudioChunk::Bytes(bytes),
            AxumMessage::Text(text) => text_chunk(text.as_str()),
            AxumMessage::Close(_) => break,
            _ => continue,
        };

        match state.controller.feed_audio(&call_id, chunk).await {
            Ok(FeedOutcome::Dropped) => dropped += 1,
            Ok(_) => {}
            Err(CallError::UnknownCall(_)) => {
                tracing::info!(call_id = %call_id, "call no longer tracked, closing media bridge");
                break;
            }
            Err(e) => tracing::warn!(call_id = %call_id, error = %e, "failed to feed bridged audio"),
        }
    }

    // The receiver must be gone before release counts bridges.
    send_task.abort();
    let _ = send_task.await;
    state.media.release(&call_id);
    tracing::info!(call_id = %call_id, dropped, "media bridge disconnected");
}
