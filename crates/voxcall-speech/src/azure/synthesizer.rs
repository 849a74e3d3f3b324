//! Text-to-speech over the regional REST endpoint.

use crate::config::SpeechConfig;
use crate::error::SpeechError;
use crate::synthesis::{SynthesisBackend, SynthesisResult, Synthesizer};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use voxcall_types::OutputFormat;

const USER_AGENT: &str = concat!("voxcall/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates one REST request per synthesis, sharing a pooled HTTP client.
#[derive(Clone)]
pub struct AzureSynthesizer {
    client: reqwest::Client,
}

impl AzureSynthesizer {
    pub fn new() -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SpeechError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SynthesisBackend for AzureSynthesizer {
    async fn create(&self, config: &SpeechConfig) -> Result<Box<dyn Synthesizer>, SpeechError> {
        if config.subscription_key.trim().is_empty() {
            return Err(SpeechError::Configuration(
                "speech subscription key is not configured".to_string(),
            ));
        }
        Ok(Box::new(AzureSynthesisRequest {
            client: self.client.clone(),
            url: config.synthesis_url(),
            subscription_key: config.subscription_key.clone(),
            output_format: config.output_format,
            closed: false,
        }))
    }
}

struct AzureSynthesisRequest {
    client: reqwest::Client,
    url: String,
    subscription_key: String,
    output_format: OutputFormat,
    closed: bool,
}

#[async_trait]
impl Synthesizer for AzureSynthesisRequest {
    async fn speak_ssml(&mut self, ssml: &str) -> Result<SynthesisResult, SpeechError> {
        if self.closed {
            return Err(SpeechError::Synthesis("synthesizer is closed".to_string()));
        }

        let response = self
            .client
            .post(&self.url)
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", self.output_format.as_str())
            .header("User-Agent", USER_AGENT)
            .body(ssml.to_string())
            .send()
            .await
            .map_err(|e| SpeechError::Transport(format!("synthesis request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(SynthesisResult::canceled(format!("HTTP {}: {}", status, body)));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Transport(format!("failed to read synthesized audio: {}", e)))?;
        Ok(SynthesisResult::completed(audio))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!("synthesizer closed");
        }
    }
}
