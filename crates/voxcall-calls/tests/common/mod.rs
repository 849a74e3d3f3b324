#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use voxcall_calls::{
    CallError, CallLifecycleController, CallingClient, Collaborators, ControllerSettings,
    MediaChannel, ReplyProducer,
};
use voxcall_speech::testing::{ScriptedRecognizer, ScriptedSynthesizer};
use voxcall_speech::{AudioBuffer, SpeechConfig, SynthesisService};
use voxcall_types::CallNotificationBatch;

pub const CALLBACK_URI: &str = "https://bot.example.com/api/calling/callback";

#[derive(Default)]
pub struct FakeCalling {
    pub fail_token: bool,
    pub fail_answer: bool,
    pub tokens: AtomicUsize,
    pub answers: Mutex<Vec<(String, String, String)>>,
}

impl FakeCalling {
    pub fn token_requests(&self) -> usize {
        self.tokens.load(Ordering::SeqCst)
    }

    pub fn answered(&self) -> Vec<(String, String, String)> {
        self.answers.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallingClient for FakeCalling {
    async fn acquire_token(&self, tenant_id: &str) -> Result<String, CallError> {
        self.tokens.fetch_add(1, Ordering::SeqCst);
        if self.fail_token {
            return Err(CallError::Credential("invalid_client".to_string()));
        }
        Ok(format!("token-{}", tenant_id))
    }

    async fn answer_call(&self, call_id: &str, token: &str, callback_uri: &str) -> Result<(), CallError> {
        if self.fail_answer {
            return Err(CallError::Answer("answer endpoint returned 403".to_string()));
        }
        self.answers.lock().unwrap().push((
            call_id.to_string(),
            token.to_string(),
            callback_uri.to_string(),
        ));
        Ok(())
    }
}

/// Replies with "You said: {text}". Fails when `fail` is set and answers
/// with whitespace when `blank` is set.
#[derive(Default)]
pub struct EchoReplies {
    pub fail: bool,
    pub blank: bool,
    pub heard: Mutex<Vec<String>>,
}

#[async_trait]
impl ReplyProducer for EchoReplies {
    async fn reply(&self, text: &str) -> Result<String, CallError> {
        self.heard.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(CallError::Reply("agent run failed".to_string()));
        }
        if self.blank {
            return Ok("  \n".to_string());
        }
        Ok(format!("You said: {}", text))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    Audio { call_id: String, bytes: Vec<u8> },
    Text { call_id: String, text: String },
}

pub struct RecordingMedia {
    tx: mpsc::UnboundedSender<Delivered>,
}

#[async_trait]
impl MediaChannel for RecordingMedia {
    async fn play_audio(&self, call_id: &str, audio: AudioBuffer) -> Result<(), CallError> {
        let _ = self.tx.send(Delivered::Audio {
            call_id: call_id.to_string(),
            bytes: audio.bytes.to_vec(),
        });
        Ok(())
    }

    async fn send_text(&self, call_id: &str, text: &str) -> Result<(), CallError> {
        let _ = self.tx.send(Delivered::Text {
            call_id: call_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

pub struct Harness {
    pub controller: CallLifecycleController,
    pub calling: Arc<FakeCalling>,
    pub replies: Arc<EchoReplies>,
    pub recognizer: ScriptedRecognizer,
    pub synthesizer: ScriptedSynthesizer,
    pub delivered: mpsc::UnboundedReceiver<Delivered>,
}

impl Harness {
    pub async fn next_delivery(&mut self) -> Delivered {
        tokio::time::timeout(Duration::from_secs(2), self.delivered.recv())
            .await
            .expect("no media delivered in time")
            .expect("media channel closed")
    }

    pub async fn wait_for_state(&self, call_id: &str, state: voxcall_types::CallState) -> bool {
        for _ in 0..200 {
            if self.controller.call_state(call_id) == Some(state) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

pub struct HarnessBuilder {
    pub calling: FakeCalling,
    pub replies: EchoReplies,
    pub recognizer: ScriptedRecognizer,
    pub synthesizer: ScriptedSynthesizer,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            calling: FakeCalling::default(),
            replies: EchoReplies::default(),
            recognizer: ScriptedRecognizer::new(),
            synthesizer: ScriptedSynthesizer::returning(&b"reply-audio"[..]),
        }
    }
}

impl HarnessBuilder {
    pub fn build(self) -> Harness {
        let calling = Arc::new(self.calling);
        let replies = Arc::new(self.replies);
        let (tx, delivered) = mpsc::unbounded_channel();
        let speech = Arc::new(SpeechConfig {
            start_timeout_ms: 500,
            stop_timeout_ms: 300,
            ..SpeechConfig::new("test", "key")
        });

        let controller = CallLifecycleController::new(
            Collaborators {
                calling: calling.clone(),
                replies: replies.clone(),
                synthesis: Arc::new(SynthesisService::new(
                    Some(Arc::clone(&speech)),
                    Arc::new(self.synthesizer.clone()),
                )),
                recognizer: Arc::new(self.recognizer.clone()),
                media: Arc::new(RecordingMedia { tx }),
                speech,
            },
            ControllerSettings {
                callback_uri: CALLBACK_URI.to_string(),
                ..ControllerSettings::default()
            },
        );

        Harness {
            controller,
            calling,
            replies,
            recognizer: self.recognizer,
            synthesizer: self.synthesizer,
            delivered,
        }
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::default().build()
}

pub fn notification(change_type: &str, call_id: &str, state: &str) -> CallNotificationBatch {
    serde_json::from_value(json!({
        "value": [{
            "changeType": change_type,
            "resource": format!("/app/calls/{}", call_id),
            "resourceData": {
                "@odata.type": "#microsoft.graph.call",
                "id": call_id,
                "state": state,
                "tenantId": "tenant-1"
            }
        }]
    }))
    .unwrap()
}

pub fn incoming(call_id: &str) -> CallNotificationBatch {
    notification("created", call_id, "incoming")
}
