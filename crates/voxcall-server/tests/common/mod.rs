#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use voxcall_calls::{
    CallError, CallLifecycleController, CallingClient, Collaborators, ControllerSettings,
    ReplyProducer,
};
use voxcall_server::media::MediaHub;
use voxcall_server::AppState;
use voxcall_speech::testing::{ScriptedRecognizer, ScriptedSynthesizer};
use voxcall_speech::{SpeechConfig, SynthesisService};

pub struct AcceptingCalls;

#[async_trait]
impl CallingClient for AcceptingCalls {
    async fn acquire_token(&self, tenant_id: &str) -> Result<String, CallError> {
        Ok(format!("token-{}", tenant_id))
    }

    async fn answer_call(&self, _call_id: &str, _token: &str, _callback_uri: &str) -> Result<(), CallError> {
        Ok(())
    }
}

pub struct Echo;

#[async_trait]
impl ReplyProducer for Echo {
    async fn reply(&self, text: &str) -> Result<String, CallError> {
        Ok(format!("You said: {}", text))
    }
}

pub struct TestServer {
    pub state: AppState,
    pub recognizer: ScriptedRecognizer,
    pub synthesizer: ScriptedSynthesizer,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_synthesizer(ScriptedSynthesizer::returning(&b"reply-audio"[..]))
    }

    pub fn with_synthesizer(synthesizer: ScriptedSynthesizer) -> Self {
        let recognizer = ScriptedRecognizer::new();
        let speech = Arc::new(SpeechConfig {
            start_timeout_ms: 500,
            stop_timeout_ms: 300,
            ..SpeechConfig::new("test", "key")
        });
        let synthesis = Arc::new(SynthesisService::new(
            Some(Arc::clone(&speech)),
            Arc::new(synthesizer.clone()),
        ));
        let media = Arc::new(MediaHub::new());

        let controller = CallLifecycleController::new(
            Collaborators {
                calling: Arc::new(AcceptingCalls),
                replies: Arc::new(Echo),
                synthesis: Arc::clone(&synthesis),
                recognizer: Arc::new(recognizer.clone()),
                media: media.clone(),
                speech,
            },
            ControllerSettings {
                callback_uri: "https://bot.example.com/api/calling/callback".to_string(),
                ..ControllerSettings::default()
            },
        );

        Self {
            state: AppState {
                controller,
                synthesis,
                media,
            },
            recognizer,
            synthesizer,
        }
    }

    pub fn app(&self) -> axum::Router {
        voxcall_server::app(self.state.clone())
    }

    /// Waits until the scripted recognizer has read at least `len` bytes.
    pub async fn wait_for_audio(&self, len: usize) -> Vec<u8> {
        for _ in 0..200 {
            let audio = self.recognizer.written_audio();
            if audio.len() >= len {
                return audio;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.recognizer.written_audio()
    }
}

pub fn incoming(call_id: &str) -> Value {
    json!({
        "value": [{
            "changeType": "created",
            "resource": format!("/app/calls/{}", call_id),
            "resourceData": {
                "@odata.type": "#microsoft.graph.call",
                "id": call_id,
                "state": "incoming",
                "tenantId": "tenant-1"
            }
        }]
    })
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
